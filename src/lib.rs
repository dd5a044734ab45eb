pub mod ast;
pub mod ast_printer;
pub mod environment;
pub mod error;
pub mod eval_dispatch;
pub mod gc;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod rope;
pub mod scanner;
pub mod token;
pub mod value;
