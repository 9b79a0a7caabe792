mod parser;
mod types;

pub(crate) use parser::ElfParser;
pub(crate) use parser::SymbolTable;
