//! Streaming parser for the handler's reply.
//!
//! The reply is a `status=` line followed by any number of file blocks.
//! Header lines are read one at a time; a block body is copied straight
//! from the read buffer into its destination file, so newline bytes in
//! the payload are never mistaken for line ends.

use crate::error::{Error, Result};
use crate::protocol::{self, FileName};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Parsed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseResult {
    /// Status reported by the handler.
    pub status: i64,
    /// Names of the files written, in stream order.
    pub files_written: Vec<String>,
}

/// Parser state between reads.
#[derive(Debug)]
enum State {
    AwaitStatus,
    AwaitFile,
    AwaitLen(FileName),
    InData(FileBlock),
}

/// A file being received: its destination and how much has arrived.
#[derive(Debug)]
pub struct FileBlock {
    name: FileName,
    path: PathBuf,
    length: u64,
    received: u64,
    file: File,
}

impl FileBlock {
    /// Create (or truncate) the destination for `name` inside `dir`.
    pub fn create(dir: &Path, name: FileName, length: u64) -> Result<Self> {
        let path = dir.join(name.as_str());
        let file = File::create(&path).map_err(|source| Error::Destination {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            name,
            path,
            length,
            received: 0,
            file,
        })
    }

    /// Bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.length - self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.length
    }

    /// Append a chunk of the body.
    ///
    /// Fails without writing anything if the chunk would go past the
    /// declared length.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let received = self.received + chunk.len() as u64;
        if received > self.length {
            return Err(Error::OversizedPayload {
                name: self.name.to_string(),
                declared: self.length,
                received,
            });
        }

        self.file
            .write_all(chunk)
            .map_err(|source| Error::Destination {
                path: self.path.clone(),
                source,
            })?;
        self.received = received;
        trace!(file = %self.name, written = self.received, len = self.length, "Written");
        Ok(())
    }

    /// Sync and close a complete file, returning its name.
    ///
    /// Errors the close would report surface here, since dropping a `File`
    /// discards them.
    pub fn finish(self) -> Result<FileName> {
        self.file.sync_all().map_err(|source| Error::Destination {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.name)
    }

    /// Close an incomplete file, returning where it lives on disk.
    fn abandon(self) -> PathBuf {
        self.path
    }
}

/// Parser for the reply stream.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    output_dir: PathBuf,
    remove_partial: bool,
}

impl ResponseParser {
    /// Create a parser that writes received files into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            remove_partial: false,
        }
    }

    /// Delete a partially received file on failure instead of leaving it.
    pub fn remove_partial(mut self, remove: bool) -> Self {
        self.remove_partial = remove;
        self
    }

    /// Consume `reader` until end of stream.
    ///
    /// Succeeds only if the stream ends right after the status line or
    /// right after a complete file body.
    pub fn parse<R: Read>(&self, reader: R) -> Result<ResponseResult> {
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, reader);
        let mut state = State::AwaitStatus;
        let mut status = None;
        let mut files_written = Vec::new();

        match self.drive(&mut reader, &mut state, &mut status, &mut files_written) {
            Ok(()) => Ok(ResponseResult {
                status: status.ok_or(Error::EmptyResponse)?,
                files_written,
            }),
            Err(e) => {
                if let State::InData(block) = state {
                    self.discard(block);
                }
                Err(e)
            }
        }
    }

    fn drive<R: BufRead>(
        &self,
        reader: &mut R,
        state: &mut State,
        status: &mut Option<i64>,
        files_written: &mut Vec<String>,
    ) -> Result<()> {
        let mut line = Vec::with_capacity(protocol::MAX_FILE_NAME_LEN + 8);

        loop {
            if let State::InData(block) = state {
                let available = reader.fill_buf()?;
                if available.is_empty() {
                    return Err(end_of_stream(state));
                }

                let want = usize::try_from(block.remaining()).unwrap_or(usize::MAX);
                let take = available.len().min(want);
                block.write_chunk(&available[..take])?;
                reader.consume(take);

                if block.is_complete() {
                    if let State::InData(block) = mem::replace(state, State::AwaitFile) {
                        files_written.push(block.finish()?.into_string());
                    }
                }
                continue;
            }

            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return match state {
                    State::AwaitFile => Ok(()),
                    _ => Err(end_of_stream(state)),
                };
            }

            *state = match mem::replace(state, State::AwaitStatus) {
                State::AwaitStatus => {
                    let value = protocol::parse_status(&line)?;
                    debug!(status = value, "Status");
                    *status = Some(value);
                    State::AwaitFile
                }
                State::AwaitFile => {
                    let name = protocol::parse_file(&line)?;
                    debug!(file = %name, "File");
                    State::AwaitLen(name)
                }
                State::AwaitLen(name) => {
                    let length = protocol::parse_len(&line)?;
                    debug!(file = %name, len = length, "Len");
                    let block = FileBlock::create(&self.output_dir, name, length)?;
                    if block.is_complete() {
                        files_written.push(block.finish()?.into_string());
                        State::AwaitFile
                    } else {
                        State::InData(block)
                    }
                }
                State::InData(block) => State::InData(block),
            };
        }
    }

    fn discard(&self, block: FileBlock) {
        let received = block.received;
        let length = block.length;
        let path = block.abandon();

        if self.remove_partial {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial file"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove partial file")
                }
            }
        } else {
            warn!(
                path = %path.display(),
                received,
                len = length,
                "Leaving partially written file"
            );
        }
    }
}

/// Error for a stream that ends anywhere but between file blocks.
fn end_of_stream(state: &State) -> Error {
    match state {
        State::AwaitStatus => Error::EmptyResponse,
        State::AwaitFile => Error::TruncatedResponse("unexpected end of stream".to_string()),
        State::AwaitLen(name) => Error::TruncatedResponse(format!("no len line for {name}")),
        State::InData(block) => Error::TruncatedResponse(format!(
            "{} received {} of {} bytes",
            block.name, block.received, block.length
        )),
    }
}
