//! Terminal window size

use nix::libc;
use serde::{Deserialize, Serialize};

/// Window size in character cells, with optional pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
    /// Width in pixels (0 when unknown)
    #[serde(default)]
    pub pixel_width: u16,
    /// Height in pixels (0 when unknown)
    #[serde(default)]
    pub pixel_height: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            cols,
            rows,
            pixel_width,
            pixel_height,
        }
    }

    /// Convert to the structure taken by `TIOCSWINSZ`
    pub fn to_winsize(self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.pixel_width,
            ws_ypixel: self.pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            cols: ws.ws_col,
            rows: ws.ws_row,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}
