//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **MemorySink**: 受け取ったメッセージを記録するだけの sink
//!
//! The real remote-queue client lives in the binary crate.

pub mod memory_sink;

pub use self::memory_sink::MemorySink;
