//! mueval-core: a Scheme interpreter core
//!
//! The interpreter is built around an explicit machine model: tagged 32-bit
//! value words ([`value`]), a two-region arena with free lists and a
//! non-recursive pointer-reversal collector ([`arena`]), a ring-buffer
//! backtracking reader ([`parser`]), a bounded writer ([`writer`]) and an
//! explicit-control evaluator over a label stack ([`evaluator`]). All state
//! lives in one [`Interp`] value.
//!
//! ```
//! use mueval_core::Interp;
//!
//! let mut interp = Interp::new().unwrap();
//! let results = interp.eval_script("(+ 1 2 3 4) ").unwrap();
//! assert_eq!(results, ["10"]);
//! ```

pub mod arena;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod parser;
pub mod primitives;
pub mod value;
pub mod writer;

pub use arena::Arena;
pub use error::{ErrorKind, EvalResult, SchemeError};
pub use evaluator::Interp;
pub use parser::{RingBuffer, Status};
pub use value::Value;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
