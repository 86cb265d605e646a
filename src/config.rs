//! Session configuration

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::size::WindowSize;

/// Options fixed when a session is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Caller-side text encoding label (`gbk`, `big5`, ...); empty means UTF-8
    pub encoding: String,
    /// Whether the caller renders color; passed through, never enforced
    pub color_able: bool,
    /// Initial columns
    pub cols: u16,
    /// Initial rows
    pub rows: u16,
    /// `KEY=VALUE` environment for the child; inherits the parent's when empty
    pub env: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let size = WindowSize::default();
        Self {
            encoding: String::new(),
            color_able: false,
            cols: size.cols,
            rows: size.rows,
            env: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn window_size(&self) -> WindowSize {
        WindowSize::new(self.cols, self.rows)
    }

    pub fn codec(&self) -> Codec {
        Codec::from_label(&self.encoding)
    }
}
