//! Driver 状态位与单槽状态信箱
//!
//! 回调每个周期上报一次状态位；非零时拼成一条消息写入信箱。
//! 信箱只保留最近一条：新消息覆盖未读消息，读取即清空。

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Driver 回调状态位
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(u32);

impl StatusFlags {
    pub const INPUT_UNDERFLOW: Self = Self(0x01);
    pub const INPUT_OVERFLOW: Self = Self(0x02);
    pub const OUTPUT_UNDERFLOW: Self = Self(0x04);
    pub const OUTPUT_OVERFLOW: Self = Self(0x08);
    pub const PRIMING_OUTPUT: Self = Self(0x10);

    /// 按位描述，顺序固定
    const DESCRIPTIONS: [(Self, &'static str); 5] = [
        (Self::INPUT_UNDERFLOW, "input underflow"),
        (Self::INPUT_OVERFLOW, "input overflow"),
        (Self::OUTPUT_UNDERFLOW, "output underflow"),
        (Self::OUTPUT_OVERFLOW, "output overflow"),
        (Self::PRIMING_OUTPUT, "priming output"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 拼接所有置位条件的描述
    ///
    /// 无置位时返回 None
    pub fn describe(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut message = String::from("driver status -");
        for (flag, text) in Self::DESCRIPTIONS {
            if self.contains(flag) {
                message.push(' ');
                message.push_str(text);
            }
        }
        Some(message)
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusFlags({:#04x})", self.0)
    }
}

/// 单槽状态信箱
#[derive(Default)]
pub struct StatusMailbox {
    slot: Mutex<Option<String>>,
}

impl StatusMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入消息，覆盖未读的旧消息
    pub fn post(&self, message: String) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(message);
    }

    /// 按状态位写入；无置位时不改变信箱
    pub fn report(&self, flags: StatusFlags) {
        if let Some(message) = flags.describe() {
            self.post(message);
        }
    }

    /// 取出并清空
    pub fn take(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_all_flags() {
        let flags = StatusFlags::INPUT_UNDERFLOW
            | StatusFlags::INPUT_OVERFLOW
            | StatusFlags::OUTPUT_UNDERFLOW
            | StatusFlags::OUTPUT_OVERFLOW
            | StatusFlags::PRIMING_OUTPUT;
        assert_eq!(
            flags.describe().unwrap(),
            "driver status - input underflow input overflow output underflow output overflow priming output"
        );
    }

    #[test]
    fn test_describe_empty() {
        assert_eq!(StatusFlags::empty().describe(), None);
        assert!(StatusFlags::from_bits(0).is_empty());
    }

    #[test]
    fn test_latest_message_wins() {
        let mailbox = StatusMailbox::new();
        mailbox.report(StatusFlags::INPUT_OVERFLOW);
        mailbox.report(StatusFlags::OUTPUT_UNDERFLOW);
        // 空状态不覆盖
        mailbox.report(StatusFlags::empty());

        assert!(mailbox.has_pending());
        assert_eq!(
            mailbox.take().as_deref(),
            Some("driver status - output underflow")
        );
        assert_eq!(mailbox.take(), None);
        assert!(!mailbox.has_pending());
    }
}
