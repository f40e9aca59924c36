use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::Result;

/// File or stdin input read in fixed size chunks.
pub struct InputReader {
    reader: Box<dyn Read>,
    /// Total size in bytes, unknown for pipes.
    size: Option<u64>,
}

impl InputReader {
    /// Opens `input_path`, or stdin for "-".
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        if input_path.as_ref().as_os_str() == "-" {
            return Ok(Self {
                reader: Box::new(io::stdin().lock()),
                size: None,
            });
        }

        let file = File::open(input_path)?;
        let size = file.metadata().ok().map(|m| m.len());

        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            size,
        })
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Calls `callback` for every chunk until EOF or until it returns `false`.
    pub fn process_chunks<F>(&mut self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let bytes_read = self.reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            if !callback(&buffer[..bytes_read])? {
                break;
            }
        }

        Ok(())
    }
}
