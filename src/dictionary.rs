//! Term dictionary: string interning with dense, monotonically assigned ids.

use std::io::{Read, Write};

use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FreesiaError, Result};

/// A dense term id. Ids are assigned in first-insertion order and are stable
/// for the lifetime of the index.
pub type TermId = u32;

/// Maps term strings to dense ids and back.
#[derive(Debug, Default)]
pub struct TermDictionary {
    map: AHashMap<String, TermId>,
    terms: Vec<String>,
}

impl TermDictionary {
    pub fn new() -> Self {
        TermDictionary::default()
    }

    /// Intern a term, assigning the next dense id on first sight.
    pub fn intern(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.map.get(term) {
            return id;
        }
        let id = self.terms.len() as TermId;
        self.terms.push(term.to_string());
        self.map.insert(term.to_string(), id);
        id
    }

    /// Look up a term without inserting it.
    pub fn get(&self, term: &str) -> Option<TermId> {
        self.map.get(term).copied()
    }

    /// The term string for an id.
    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.get(id as usize).map(|s| s.as_str())
    }

    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Write the dictionary in id order.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.terms.len() as u32)?;
        for term in &self.terms {
            let bytes = term.as_bytes();
            writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
            writer.write_all(bytes)?;
        }
        Ok(())
    }

    /// Read a dictionary previously written by [`save`](Self::save).
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut dictionary = TermDictionary::new();
        for _ in 0..count {
            let len = reader.read_u32::<LittleEndian>()? as usize;
            if len > 1 << 20 {
                return Err(FreesiaError::corrupted(format!(
                    "term length {len} exceeds the 1 MiB record bound"
                )));
            }
            let mut bytes = vec![0u8; len];
            reader.read_exact(&mut bytes)?;
            let term = String::from_utf8(bytes)
                .map_err(|_| FreesiaError::corrupted("term record is not valid UTF-8"))?;
            dictionary.intern(&term);
        }
        Ok(dictionary)
    }
}
