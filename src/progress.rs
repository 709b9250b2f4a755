// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Human-readable progress side channel.
//!
//! Messages sent through here are meant for whoever is watching the batch.
//! Nothing in the crate inspects them for control flow.

/// Sink for progress messages.
pub trait Progress: Send + Sync {
    /// Report a single progress message.
    fn report(&self, message: &str);
}

impl<F> Progress for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Progress sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Progress for Silent {
    fn report(&self, _message: &str) {}
}
