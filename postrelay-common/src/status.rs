//! Transfer and automation outcome codes
//!
//! Codes are what the ledger stores and what collaborators report. The
//! operator-facing label (`human()`) is what gets written back into the
//! spreadsheet `status` column.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a transfer or automation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeCode {
    Success,
    /// Nothing changed since the last complete transfer
    NoChanges,
    DeviceNotFound,
    DeviceNotConnected,
    InvalidPath,
    WaitingMedia,
    NoMediaFiles,
    /// Some files delivered, some outstanding
    TransferIncomplete,
    TransferFailed,
    SourceNotFound,
    Failed,
    AutomationFailed,
    NoImagesSelected,
    FolderNotFound,
    NextButtonNotFound,
    SelectAlbumFailed,
}

impl OutcomeCode {
    pub const ALL: [OutcomeCode; 16] = [
        OutcomeCode::Success,
        OutcomeCode::NoChanges,
        OutcomeCode::DeviceNotFound,
        OutcomeCode::DeviceNotConnected,
        OutcomeCode::InvalidPath,
        OutcomeCode::WaitingMedia,
        OutcomeCode::NoMediaFiles,
        OutcomeCode::TransferIncomplete,
        OutcomeCode::TransferFailed,
        OutcomeCode::SourceNotFound,
        OutcomeCode::Failed,
        OutcomeCode::AutomationFailed,
        OutcomeCode::NoImagesSelected,
        OutcomeCode::FolderNotFound,
        OutcomeCode::NextButtonNotFound,
        OutcomeCode::SelectAlbumFailed,
    ];

    /// Machine code as stored in the ledger
    pub fn as_code(self) -> &'static str {
        match self {
            OutcomeCode::Success => "SUCCESS",
            OutcomeCode::NoChanges => "NO_CHANGES",
            OutcomeCode::DeviceNotFound => "DEVICE_NOT_FOUND",
            OutcomeCode::DeviceNotConnected => "DEVICE_NOT_CONNECTED",
            OutcomeCode::InvalidPath => "INVALID_PATH",
            OutcomeCode::WaitingMedia => "WAITING_MEDIA",
            OutcomeCode::NoMediaFiles => "NO_MEDIA_FILES",
            OutcomeCode::TransferIncomplete => "TRANSFER_INCOMPLETE",
            OutcomeCode::TransferFailed => "TRANSFER_FAILED",
            OutcomeCode::SourceNotFound => "SOURCE_NOT_FOUND",
            OutcomeCode::Failed => "FAILED",
            OutcomeCode::AutomationFailed => "AUTOMATION_FAILED",
            OutcomeCode::NoImagesSelected => "NO_IMAGES_SELECTED",
            OutcomeCode::FolderNotFound => "FOLDER_NOT_FOUND",
            OutcomeCode::NextButtonNotFound => "NEXT_BUTTON_NOT_FOUND",
            OutcomeCode::SelectAlbumFailed => "SELECT_ALBUM_FAILED",
        }
    }

    /// Operator-facing label written to the spreadsheet
    pub fn human(self) -> &'static str {
        match self {
            OutcomeCode::Success => "执行成功",
            OutcomeCode::NoChanges => "执行成功",
            OutcomeCode::DeviceNotFound => "设备未找到",
            OutcomeCode::DeviceNotConnected => "设备未连接",
            OutcomeCode::InvalidPath => "路径无效",
            OutcomeCode::WaitingMedia => "等待素材目录",
            OutcomeCode::NoMediaFiles => "等待图片",
            OutcomeCode::TransferIncomplete => "传输不完整",
            OutcomeCode::TransferFailed => "传输失败",
            OutcomeCode::SourceNotFound => "源文件不存在",
            OutcomeCode::Failed => "执行失败",
            OutcomeCode::AutomationFailed => "发布失败",
            OutcomeCode::NoImagesSelected => "未选择图片",
            OutcomeCode::FolderNotFound => "相册未找到",
            OutcomeCode::NextButtonNotFound => "下一步按钮未找到",
            OutcomeCode::SelectAlbumFailed => "选择相册失败",
        }
    }

    /// Whether the task's media is fully on the device
    pub fn is_delivered(self) -> bool {
        matches!(self, OutcomeCode::Success | OutcomeCode::NoChanges)
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Unknown outcome code string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outcome code: {0}")]
pub struct UnknownOutcome(pub String);

impl FromStr for OutcomeCode {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OutcomeCode::ALL
            .iter()
            .copied()
            .find(|c| c.as_code() == s)
            .ok_or_else(|| UnknownOutcome(s.to_string()))
    }
}

/// Whether a spreadsheet status cell means "not yet started"
///
/// Empty cells and the placeholders left by other tools (`nan`, `None`)
/// count as not started.
pub fn is_unstarted(status: &str) -> bool {
    let s = status.trim();
    s.is_empty() || s.eq_ignore_ascii_case("nan") || s == "None"
}

/// Whether a spreadsheet status cell marks the task as done
///
/// Accepts both the machine code and its label, since operators and older
/// runs have written either.
pub fn is_success_status(status: &str) -> bool {
    let s = status.trim();
    s == OutcomeCode::Success.as_code() || s == OutcomeCode::Success.human()
}
