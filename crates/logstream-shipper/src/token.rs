// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Continuation tokens of the append protocol.
//!
//! Every put after the first one on a stream must carry the token returned by
//! the previous successful put. The token only moves forward: it is replaced
//! after each success, and forgotten when the service reports a mismatch so
//! the next attempt is sent without one instead of guessing.

use std::collections::HashMap;
use tracing::debug;

use crate::event::StreamIdentity;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenState {
    /// No put has been made on the stream yet.
    #[default]
    Unset,
    Known(String),
    /// The service rejected the last token; the true value is not known.
    Unknown,
}

#[derive(Debug, Default)]
pub struct TokenManager {
    tokens: HashMap<StreamIdentity, TokenState>,
}

impl TokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to attach to the next put on `stream`, if any.
    #[must_use]
    pub fn current_token(&self, stream: &StreamIdentity) -> Option<&str> {
        match self.tokens.get(stream) {
            Some(TokenState::Known(token)) => Some(token.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn state(&self, stream: &StreamIdentity) -> TokenState {
        self.tokens.get(stream).cloned().unwrap_or_default()
    }

    /// Stores the token returned by a successful put.
    ///
    /// A success without a token leaves the stream with no known token, and the
    /// next put goes out without one.
    pub fn record_success(&mut self, stream: &StreamIdentity, next_token: Option<String>) {
        let state = match next_token {
            Some(token) => TokenState::Known(token),
            None => TokenState::Unknown,
        };
        self.tokens.insert(stream.clone(), state);
    }

    /// Takes the token the service reported as expected.
    ///
    /// Only used once the stale token has been dropped and a tokenless attempt
    /// was answered with the true value.
    pub fn adopt(&mut self, stream: &StreamIdentity, token: String) {
        debug!("LOGS | Adopting continuation token reported for {}", stream);
        self.tokens.insert(stream.clone(), TokenState::Known(token));
    }

    /// Forgets the token after a mismatch.
    pub fn invalidate(&mut self, stream: &StreamIdentity) {
        debug!("LOGS | Invalidating continuation token for {}", stream);
        self.tokens.insert(stream.clone(), TokenState::Unknown);
    }

    /// Drops all state for `stream`, e.g. when its driver stops.
    pub fn remove(&mut self, stream: &StreamIdentity) {
        self.tokens.remove(stream);
    }
}
