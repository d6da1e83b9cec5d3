//! courier-core
//!
//! Durable local queue that relays messages to a remote sink.
//!
//! # モジュール構成
//! - **store**: ファイルシステム上の永続キュー（per-item lock, wait/timer）
//! - **ports**: 抽象化レイヤー（Clock, Sink）
//! - **app**: 配送ループ（RelayLoop, RetryPolicy）
//! - **impls**: 開発用・テスト用の実装（MemorySink）
//! - **observability**: status views
//! - **error**: エラー型

pub mod app;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod store;

pub use error::{OpenError, StoreError};
pub use store::{FsStore, ItemHandle, Store, StoreConfig};
