//! The tiny shared "database": five words, indexed 0..4.

use thiserror::Error;

pub const WORD_COUNT: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("index {0} is out of range 0..{}", WORD_COUNT - 1)]
    IndexOutOfRange(u8),
}

/// An ordered sequence of exactly five strings.
///
/// Mutated only by the consensus engine on resolution of a root round; there
/// is a single logical writer so no internal locking is needed.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    words: [String; WORD_COUNT],
}

impl LocalDatabase {
    pub fn new() -> Self {
        Self {
            words: std::array::from_fn(|i| format!("word{i}")),
        }
    }

    pub fn get(&self, index: u8) -> Result<&str, DatabaseError> {
        self.words
            .get(index as usize)
            .map(String::as_str)
            .ok_or(DatabaseError::IndexOutOfRange(index))
    }

    pub fn set(&mut self, index: u8, value: String) -> Result<(), DatabaseError> {
        let slot = self
            .words
            .get_mut(index as usize)
            .ok_or(DatabaseError::IndexOutOfRange(index))?;
        *slot = value;
        Ok(())
    }

    pub fn snapshot(&self) -> [String; WORD_COUNT] {
        self.words.clone()
    }
}

impl Default for LocalDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates that `index` is a legal database index, per the `consensus`
/// command's argument validation.
pub fn validate_index(index: u8) -> Result<(), DatabaseError> {
    if (index as usize) < WORD_COUNT {
        Ok(())
    } else {
        Err(DatabaseError::IndexOutOfRange(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_placeholder_words() {
        let db = LocalDatabase::new();
        for i in 0..WORD_COUNT as u8 {
            assert_eq!(db.get(i).unwrap(), format!("word{i}"));
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut db = LocalDatabase::new();
        db.set(2, "apple".to_string()).unwrap();
        assert_eq!(db.get(2).unwrap(), "apple");
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let db = LocalDatabase::new();
        assert!(matches!(db.get(5), Err(DatabaseError::IndexOutOfRange(5))));
        assert!(validate_index(5).is_err());
        assert!(validate_index(4).is_ok());
    }
}
