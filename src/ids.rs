//! Token and message-id generation.

use std::sync::atomic::{AtomicU16, Ordering};

use rand::prelude::*;

/// Length of the tokens this crate generates.
pub const TOKEN_LEN: usize = 8;

/// A fresh random token.
pub fn generate_token() -> Vec<u8> {
    let mut token = vec![0; TOKEN_LEN];
    thread_rng().fill_bytes(&mut token);
    token
}

/// Hands out message ids from a randomly seeded, wrapping counter.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicU16,
}

impl MessageIdGenerator {
    pub fn new() -> MessageIdGenerator {
        MessageIdGenerator::starting_at(thread_rng().gen())
    }

    pub fn starting_at(first: u16) -> MessageIdGenerator {
        MessageIdGenerator {
            next: AtomicU16::new(first),
        }
    }

    pub fn next_id(&self) -> u16 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        MessageIdGenerator::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_wrap() {
        let ids = MessageIdGenerator::starting_at(u16::MAX);
        assert_eq!(u16::MAX, ids.next_id());
        assert_eq!(0, ids.next_id());
        assert_eq!(1, ids.next_id());
    }

    #[test]
    fn tokens_differ() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(TOKEN_LEN, a.len());
        assert_ne!(a, b);
    }
}
