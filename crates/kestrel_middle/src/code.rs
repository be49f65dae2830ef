use std::rc::Rc;

use bitflags::bitflags;

bitflags! {
    /// Status flags of a compiled code unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CodeFlags: u16 {
        const STRICT_MODE = 1 << 0;
        const IS_FUNCTION = 1 << 1;
        /// The unit body is wrapped in a lexical block scope of its own.
        const HAS_LEXICAL_BLOCK = 1 << 2;
        /// Some header field exceeds `u8`. In-memory fields are always `u16`;
        /// the flag records which wire header form the unit would use.
        const UINT16_ARGUMENTS = 1 << 3;
        const REST_PARAMETER = 1 << 4;
        const STATIC_FUNCTION = 1 << 5;
        const ARROW = 1 << 6;
        const GENERATOR = 1 << 7;
        const ASYNC = 1 << 8;
        const MODULE = 1 << 9;
        const DEBUGGER_IGNORE = 1 << 10;
        /// Literal indices use the full encoding (see `read_literal_index`).
        const FULL_LITERAL_ENCODING = 1 << 11;
        const CONSTRUCTOR = 1 << 12;
        /// Constructor of a class with an extends clause. `this` starts
        /// uninitialized and is bound by `super()`.
        const DERIVED_CONSTRUCTOR = 1 << 13;
    }
}

/// One-byte literal indices below this value are complete in the small encoding.
pub const SMALL_LITERAL_ENCODING_LIMIT: u16 = 255;
pub const SMALL_LITERAL_ENCODING_DELTA: u16 = 0xfe01;
/// One-byte literal indices below this value are complete in the full encoding.
pub const FULL_LITERAL_ENCODING_LIMIT: u16 = 128;
pub const FULL_LITERAL_ENCODING_DELTA: u16 = 0x8000;

/// An entry of a code unit's literal table.
///
/// The VM turns these into runtime values on demand; identifier literals name
/// bindings and properties and never appear as plain values.
#[derive(Debug, Clone)]
pub enum Literal {
    Number(f64),
    String(Rc<str>),
    Identifier(Rc<str>),
    Boolean(bool),
    Null,
    Undefined,
    Function(Rc<CodeUnit>),
}

impl Literal {
    pub fn as_identifier(&self) -> Option<&Rc<str>> {
        match self {
            Literal::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<CodeUnit>> {
        match self {
            Literal::Function(code) => Some(code),
            _ => None,
        }
    }
}

/// An immutable compiled code unit, the unit of execution handed to the VM.
///
/// Literal-index space: indices below `register_end` address frame registers;
/// `register_end..ident_end` are identifier literals, `ident_end..const_literal_end`
/// constant literals and `const_literal_end..literal_end` sub-function units.
/// The `literals` table holds the non-register part, i.e. its slot `i` is
/// literal index `register_end + i`.
#[derive(Debug)]
pub struct CodeUnit {
    pub flags: CodeFlags,
    /// Number of declared parameters. Always <= `register_end`.
    pub argument_end: u16,
    pub register_end: u16,
    pub ident_end: u16,
    pub const_literal_end: u16,
    pub literal_end: u16,
    /// Operand stack capacity required by this unit, in values.
    pub stack_limit: u16,
    pub literals: Box<[Literal]>,
    pub code: Box<[u8]>,
    /// Resource (file) name for diagnostics, if known.
    pub resource_name: Option<Rc<str>>,
}

impl CodeUnit {
    pub fn is_strict(&self) -> bool {
        self.flags.contains(CodeFlags::STRICT_MODE)
    }

    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    pub fn full_literal_encoding(&self) -> bool {
        self.flags.contains(CodeFlags::FULL_LITERAL_ENCODING)
    }

    /// Looks up a non-register literal by its literal index.
    ///
    /// # Panics
    /// Panics if `index` addresses the register space or lies past the table,
    /// which only a miscompiled unit can produce.
    pub fn literal(&self, index: u16) -> &Literal {
        debug_assert!(index >= self.register_end && index < self.literal_end);
        &self.literals[usize::from(index - self.register_end)]
    }

    pub fn is_register(&self, index: u16) -> bool {
        index < self.register_end
    }

    pub fn is_ident(&self, index: u16) -> bool {
        (self.register_end..self.ident_end).contains(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_index_spaces() {
        let unit = CodeUnit {
            flags: CodeFlags::empty(),
            argument_end: 1,
            register_end: 2,
            ident_end: 4,
            const_literal_end: 5,
            literal_end: 5,
            stack_limit: 4,
            literals: vec![
                Literal::Identifier("x".into()),
                Literal::Identifier("y".into()),
                Literal::Number(42.0),
            ]
            .into(),
            code: Box::default(),
            resource_name: None,
        };

        assert!(unit.is_register(1));
        assert!(!unit.is_register(2));
        assert!(unit.is_ident(3));
        assert!(!unit.is_ident(4));
        assert!(matches!(unit.literal(4), Literal::Number(n) if *n == 42.0));
        assert_eq!(unit.literal(2).as_identifier().unwrap().as_ref(), "x");
    }
}
