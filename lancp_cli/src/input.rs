//! Terminal prompt for the peer's passphrase.

use lancp_core::Role;
use lancp_core::passphrase::PassphraseInput;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

pub const CARET: char = '➜';

/// Prompts on `writer` and reads one line from `reader`.
pub struct Capturer<R, W> {
    caret: char,
    reader: Mutex<R>,
    writer: Mutex<W>,
}

impl Capturer<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(CARET, io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> Capturer<R, W> {
    pub fn new(caret: char, reader: R, writer: W) -> Self {
        Self {
            caret,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::other("input lock poisoned")
}

impl<R, W> PassphraseInput for Capturer<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn capture(&self, peer: Role) -> io::Result<String> {
        {
            let mut writer = self.writer.lock().map_err(poisoned)?;
            write!(
                writer,
                "Enter the passphrase displayed on the {}'s machine:\n{} ",
                peer, self.caret
            )?;
            writer.flush()?;
        }

        let mut line = String::new();
        let n = self.reader.lock().map_err(poisoned)?.read_line(&mut line)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before a passphrase was entered",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
