//! Bounded, newest-wins log ring shared by every component (spec §3 "Log ring",
//! §9 "do not block producers").

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub message: String,
}

/// A fixed-capacity ring buffer of formatted log records. Push never blocks
/// and never grows past `capacity`; the oldest entry is dropped on overflow.
pub struct LogRing {
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, level: impl Into<String>, message: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            timestamp: chrono::Utc::now(),
            level: level.into(),
            message: message.into(),
        });
    }

    /// Last `n` lines, oldest first within the returned slice.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let lines = self.lines.lock().unwrap();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.push("info", format!("line {i}"));
        }
        let tail = ring.tail(10);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].message, "line 2");
        assert_eq!(tail[2].message, "line 4");
    }

    #[test]
    fn tail_bounded_by_n() {
        let ring = LogRing::new(10);
        for i in 0..10 {
            ring.push("info", format!("{i}"));
        }
        assert_eq!(ring.tail(3).len(), 3);
        assert_eq!(ring.tail(3)[2].message, "9");
    }
}
