use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use uartscope_decode::UartChar;

use crate::TextEncoding;

pub const DEFAULT_RX_LOG_ENTRIES: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct RxEntry {
    pub timestamp: u64,
    pub byte: u8,
    pub error: bool,
}

/// Rolling record of received characters, oldest dropped first.
pub struct RxLog {
    entries: VecDeque<RxEntry>,
    max_entries: usize,
}

impl Default for RxLog {
    fn default() -> Self {
        Self::new(DEFAULT_RX_LOG_ENTRIES)
    }
}

impl RxLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(4096)),
            max_entries,
        }
    }

    pub fn push(&mut self, c: UartChar) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        self.entries.push_back(RxEntry {
            timestamp,
            byte: c.byte,
            error: c.error,
        });

        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RxEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.error).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.entries.iter().map(|e| e.byte).collect()
    }

    /// Hex dump; corrupted bytes are prefixed with `!`.
    pub fn to_hex(&self) -> String {
        let mut result = String::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            if !result.is_empty() {
                result.push(' ');
            }
            if entry.error {
                result.push('!');
            }
            result.push_str(&format!("{:02X}", entry.byte));
        }
        result
    }

    /// Decodes runs of clean bytes with `encoding`; corrupted bytes are shown
    /// in brackets as hex so they stand out from real text.
    pub fn to_text(&self, encoding: TextEncoding) -> String {
        let mut result = String::new();
        let mut run: Vec<u8> = Vec::new();

        for entry in &self.entries {
            if entry.error {
                if !run.is_empty() {
                    result.push_str(&encoding.decode(&run));
                    run.clear();
                }
                result.push_str(&format!("【{:02X}】", entry.byte));
            } else {
                run.push(entry.byte);
            }
        }
        if !run.is_empty() {
            result.push_str(&encoding.decode(&run));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(byte: u8) -> UartChar {
        UartChar { byte, error: false }
    }

    #[test]
    fn keeps_only_newest_entries() {
        let mut log = RxLog::new(3);
        for b in b"abcde" {
            log.push(clean(*b));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.bytes(), b"cde");
    }

    #[test]
    fn marks_corrupted_bytes() {
        let mut log = RxLog::default();
        log.push(clean(b'O'));
        log.push(UartChar { byte: 0xF0, error: true });
        log.push(clean(b'K'));

        assert_eq!(log.to_hex(), "4F !F0 4B");
        assert_eq!(log.to_text(TextEncoding::Ascii), "O【F0】K");
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn clear_empties_log() {
        let mut log = RxLog::default();
        log.push(clean(b'x'));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.to_hex(), "");
    }
}
