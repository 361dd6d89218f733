//! Short spoken passphrases used to authenticate the two operators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::io;

use crate::Role;

/// Short, phonetically distinct English words.
pub const WORDLIST: &[&str] = &[
    "absurd", "banjo", "concert", "dashboard", "erase", "framework", "goldfish", "hockey",
    "involve", "jupiter", "kickoff", "lockup", "molasses", "nebula", "octopus", "paperweight",
    "quiver", "ribcage", "snapshot", "tycoon", "umpire", "vapor", "walnut", "yodel",
];

#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(word: impl Into<String>) -> Self {
        Self(word.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether a received datagram payload is exactly this passphrase.
    pub fn matches(&self, payload: &[u8]) -> bool {
        payload == self.0.as_bytes()
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keep passphrases out of debug logs.
impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(..)")
    }
}

/// Draws passphrases from one RNG that is seeded once, from the OS.
pub struct PassphraseGenerator<R = StdRng> {
    rng: R,
}

impl PassphraseGenerator<StdRng> {
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl<R: Rng> PassphraseGenerator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    pub fn generate(&mut self) -> Passphrase {
        let idx = self.rng.random_range(0..WORDLIST.len());
        Passphrase::new(WORDLIST[idx])
    }
}

/// Pick a word with the thread-local RNG.
pub fn generate() -> Passphrase {
    PassphraseGenerator::with_rng(rand::rng()).generate()
}

/// Source of the operator's guess of the peer's passphrase.
///
/// Implementations may block (e.g. read a terminal); callers run them on a
/// blocking thread.
pub trait PassphraseInput: Send + Sync {
    fn capture(&self, peer: Role) -> io::Result<String>;
}

/// Input that always answers with the same text.
#[derive(Debug, Clone)]
pub struct FixedInput(pub String);

impl PassphraseInput for FixedInput {
    fn capture(&self, _peer: Role) -> io::Result<String> {
        Ok(self.0.clone())
    }
}
