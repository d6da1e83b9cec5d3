//! App - アプリケーション層
//!
//! store と sink を組み合わせて配送ループを実装します。
//!
//! # 主要コンポーネント
//! - **RelayLoop**: wait→get→send→remove/close を繰り返す
//! - **RetryPolicy**: 失敗が続いたときの backoff

pub mod relay_loop;
pub mod retry;

pub use self::relay_loop::{RelayHandle, RelayLoop, Step};
pub use self::retry::RetryPolicy;
