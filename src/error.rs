//! The unified error type surfaced by the compiler binary.
//!
//! Every stage of the pipeline keeps its own error type close to the code
//! that raises it; this just wraps them for callers that walk the whole
//! pipeline (see `src/bin/smolc.rs`).

use derive_more::{Display, From};

use crate::back::codegen::CodegenError;
use crate::front::lex::LexError;
use crate::front::lower::LowerError;
use crate::front::parse::ParseError;

#[derive(Display, From)]
pub enum Error {
    #[display("{_0}")]
    Lex(LexError),
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{_0}")]
    Lower(LowerError),
    #[display("{_0}")]
    Codegen(CodegenError),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}
