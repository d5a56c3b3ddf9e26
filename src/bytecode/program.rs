use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Version tag written in front of every serialized program.
pub const FORMAT_VERSION: u16 = 1;

/// An assembled program: the byte stream the VM executes plus the entry
/// address of every function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<u8>,
    pub symbols: BTreeMap<String, u8>,
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed program file: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("unsupported program format version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u16,
    program: Program,
}

impl Program {
    /// Wrap raw bytes without symbols, e.g. when loading a `.bin` dump.
    pub fn from_code(code: Vec<u8>) -> Self {
        Program {
            code,
            symbols: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Name of the function whose entry is exactly `addr`.
    pub fn symbol_at(&self, addr: usize) -> Option<&str> {
        self.symbols
            .iter()
            .find(|(_, a)| **a as usize == addr)
            .map(|(name, _)| name.as_str())
    }

    /// Serialize with postcard, prefixed by the format version.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProgramIoError> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            program: self.clone(),
        };
        Ok(postcard::to_allocvec(&envelope)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramIoError> {
        let envelope: Envelope = postcard::from_bytes(bytes)?;
        if envelope.version != FORMAT_VERSION {
            return Err(ProgramIoError::UnsupportedVersion {
                found: envelope.version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(envelope.program)
    }

    /// Write to `path`. A `.bin` extension stores the raw code bytes only;
    /// anything else stores the postcard container.
    pub fn save(&self, path: &Path) -> Result<(), ProgramIoError> {
        let bytes = if is_raw(path) {
            self.code.clone()
        } else {
            self.to_bytes()?
        };
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ProgramIoError> {
        let bytes = fs::read(path)?;
        if is_raw(path) {
            Ok(Program::from_code(bytes))
        } else {
            Program::from_bytes(&bytes)
        }
    }
}

fn is_raw(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        let mut symbols = BTreeMap::new();
        symbols.insert("f".to_string(), 4);
        Program {
            code: vec![0x10, 0, 5, 0xFF, 0x40],
            symbols,
        }
    }

    #[test]
    fn test_postcard_container() {
        let program = sample();
        let bytes = program.to_bytes().unwrap();
        assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
    }

    #[test]
    fn test_version_mismatch() {
        let envelope = Envelope {
            version: FORMAT_VERSION + 1,
            program: sample(),
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(ProgramIoError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Program::from_bytes(&[0xFF]),
            Err(ProgramIoError::Encoding(_))
        ));
    }

    #[test]
    fn test_save_and_load_files() {
        let dir = std::env::temp_dir().join(format!("rexion-program-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let program = sample();
        let container = dir.join("prog.rxb");
        program.save(&container).unwrap();
        assert_eq!(Program::load(&container).unwrap(), program);

        let raw = dir.join("prog.bin");
        program.save(&raw).unwrap();
        assert_eq!(fs::read(&raw).unwrap(), program.code);
        assert_eq!(Program::load(&raw).unwrap(), Program::from_code(program.code.clone()));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_symbol_at() {
        assert_eq!(sample().symbol_at(4), Some("f"));
        assert_eq!(sample().symbol_at(0), None);
    }
}
