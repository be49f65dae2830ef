//! Opcode set and the decode table.
//!
//! Opcodes are one byte; the `Ext` value introduces a second byte indexing the
//! extended set. Every opcode owns one entry in the flat [`DECODE_TABLE`]
//! (primary opcodes first, extended opcodes contiguously after), which packs
//! the operand shape, the semantic group executed by the dispatcher and the
//! put-result disposition into 16 bits. A single macro defines the enum and
//! its table region so the two cannot drift apart.

use strum::EnumCount as _;
use strum_macros::{EnumCount, FromRepr};

/// How the dispatcher fetches operands before executing an opcode group.
///
/// `Branch1`..`Branch3` carry a big-endian branch offset of that many bytes;
/// the offset's sign comes from the opcode class (`BACKWARD_BRANCH`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum OperandShape {
    None,
    Stack,
    StackStack,
    Literal,
    LiteralLiteral,
    StackLiteral,
    ThisLiteral,
    Branch1,
    Branch2,
    Branch3,
}

impl OperandShape {
    pub fn branch_length(self) -> Option<u8> {
        match self {
            OperandShape::Branch1 => Some(1),
            OperandShape::Branch2 => Some(2),
            OperandShape::Branch3 => Some(3),
            _ => None,
        }
    }
}

/// Semantic groups executed by the dispatch loop. Several opcodes may share a
/// group and differ only in operand shape, put disposition or family index.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum OpGroup {
    Nop,
    Pop,
    PopBlock,
    PushLiteral,
    PushTwo,
    PushThree,
    PushUndefined,
    PushNull,
    PushTrue,
    PushFalse,
    PushThis,
    PushNumber0,
    PushPosByte,
    PushNegByte,
    PushLitNumber0,
    PushLitPosByte,
    PushLitNegByte,
    PushObject,
    PushArray,
    PushElision,
    PushSpreadElement,
    PushNewTarget,
    PushNamedFuncExpr,
    AppendArray,
    IdentReference,
    TypeofIdent,
    Typeof,
    CreateBinding,
    InitBinding,
    VarEval,
    CheckVar,
    CheckLet,
    AssignLetConst,
    ThrowConstError,
    MovIdent,
    Assign,
    AssignPropThis,
    SetProperty,
    SetComputedProperty,
    SetAccessor,
    SetComputedAccessor,
    SetProto,
    PropGet,
    PropReference,
    PropLitReference,
    PropDelete,
    DeleteIdent,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitOr,
    BitXor,
    BitAnd,
    LeftShift,
    RightShift,
    UnsRightShift,
    BitNot,
    Not,
    Plus,
    Minus,
    Void,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    In,
    InstanceOf,
    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
    Jump,
    BranchIfTrue,
    BranchIfFalse,
    BranchIfLogicalTrue,
    BranchIfLogicalFalse,
    BranchIfStrictEqual,
    JumpAndExitContext,
    TryContext,
    CatchJump,
    FinallyContext,
    ContextEnd,
    WithContext,
    BlockCreateContext,
    TryCreateEnv,
    CloneContext,
    ForInCreateContext,
    ForInGetNext,
    ForInHasNext,
    ForOfCreateContext,
    ForOfGetNext,
    ForOfHasNext,
    GetIterator,
    IteratorStep,
    IteratorClose,
    DefaultInitializer,
    RestInitializer,
    InitializerPushProp,
    RequireObjectCoercible,
    Call,
    Construct,
    SuperCall,
    SpreadArguments,
    ResolveBaseForCall,
    DirectEval,
    Return,
    ReturnWithBlock,
    ReturnPromise,
    Throw,
    CreateGenerator,
    Yield,
    Await,
    PushClassEnvironment,
    PushImplicitCtor,
    InitClass,
    FinalizeClass,
    PushSuperConstructor,
    ResolveLexicalThis,
    SuperReference,
}

/// One 16-bit decode-table entry.
///
/// Layout: bits 0..=6 group, bits 7..=10 operand shape, bit 11 `PUT_STACK`,
/// bit 12 `PUT_BLOCK`, bit 13 `PUT_IDENT`, bit 14 `PUT_REFERENCE`,
/// bit 15 `BACKWARD_BRANCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeEntry(u16);

impl DecodeEntry {
    pub const PUT_STACK: u16 = 1 << 11;
    pub const PUT_BLOCK: u16 = 1 << 12;
    pub const PUT_IDENT: u16 = 1 << 13;
    pub const PUT_REFERENCE: u16 = 1 << 14;
    pub const BACKWARD_BRANCH: u16 = 1 << 15;

    pub const fn new(group: OpGroup, shape: OperandShape, flags: u16) -> Self {
        Self(group as u16 | ((shape as u16) << 7) | flags)
    }

    pub fn group(self) -> OpGroup {
        OpGroup::from_repr((self.0 & 0x7f) as u8).expect("Corrupt decode entry")
    }

    pub fn shape(self) -> OperandShape {
        OperandShape::from_repr(((self.0 >> 7) & 0xf) as u8).expect("Corrupt decode entry")
    }

    pub fn put_stack(self) -> bool {
        self.0 & Self::PUT_STACK != 0
    }

    pub fn put_block(self) -> bool {
        self.0 & Self::PUT_BLOCK != 0
    }

    pub fn put_ident(self) -> bool {
        self.0 & Self::PUT_IDENT != 0
    }

    pub fn put_reference(self) -> bool {
        self.0 & Self::PUT_REFERENCE != 0
    }

    pub fn puts_result(self) -> bool {
        self.0 & (Self::PUT_STACK | Self::PUT_BLOCK | Self::PUT_IDENT | Self::PUT_REFERENCE) != 0
    }

    pub fn is_backward_branch(self) -> bool {
        self.0 & Self::BACKWARD_BRANCH != 0
    }
}

macro_rules! define_opcodes {
    (
        $(#[$meta:meta])*
        $name:ident, $table:ident, $count:ident: $(
            $(#[$vmeta:meta])*
            $variant:ident => $group:ident $shape:ident $([$($flag:ident)|+])?
        ),+ $(,)?
    ) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromRepr, EnumCount)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        pub const $count: usize = $name::COUNT;

        pub const $table: [DecodeEntry; $count] = [
            $(DecodeEntry::new(
                OpGroup::$group,
                OperandShape::$shape,
                0 $($(| DecodeEntry::$flag)+)?,
            )),+
        ];
    };
}

define_opcodes! {
    /// Primary opcode set. Branch-class opcodes come in triplets, one per
    /// offset width; the call and construct families are compressed by arity.
    Opcode, PRIMARY_TABLE, PRIMARY_COUNT:

    /// Prefix byte introducing the extended opcode set; never dispatched.
    Ext => Nop None,
    Pop => Pop Stack,
    PopBlock => PopBlock Stack [PUT_BLOCK],

    Push => PushLiteral Literal [PUT_STACK],
    PushTwo => PushTwo LiteralLiteral,
    PushThree => PushThree LiteralLiteral,
    PushUndefined => PushUndefined None [PUT_STACK],
    PushNull => PushNull None [PUT_STACK],
    PushTrue => PushTrue None [PUT_STACK],
    PushFalse => PushFalse None [PUT_STACK],
    PushThis => PushThis None [PUT_STACK],
    PushZero => PushNumber0 None [PUT_STACK],
    PushPosByte => PushPosByte None [PUT_STACK],
    PushNegByte => PushNegByte None [PUT_STACK],
    PushLitZero => PushLitNumber0 Literal,
    PushLitPosByte => PushLitPosByte Literal,
    PushLitNegByte => PushLitNegByte Literal,
    PushObject => PushObject None [PUT_STACK],
    PushArray => PushArray None [PUT_STACK],
    PushElision => PushElision None [PUT_STACK],
    /// Argument byte: element count popped and appended to the array beneath.
    AppendArray => AppendArray None,
    PushNamedFuncExpr => PushNamedFuncExpr LiteralLiteral,

    IdentReference => IdentReference None,
    TypeofIdent => TypeofIdent None [PUT_STACK],
    Typeof => Typeof Stack [PUT_STACK],

    CreateVar => CreateBinding None,
    CreateLet => CreateBinding None,
    CreateConst => CreateBinding None,
    InitVar => InitBinding None,
    InitLet => InitBinding None,
    InitConst => InitBinding None,
    CheckVar => CheckVar None,
    CheckLet => CheckLet None,
    AssignLetConst => AssignLetConst Stack,
    ThrowConstError => ThrowConstError None,

    MovIdent => MovIdent Stack [PUT_IDENT],
    MovIdentPush => MovIdent Stack [PUT_IDENT | PUT_STACK],
    MovIdentBlock => MovIdent Stack [PUT_IDENT | PUT_BLOCK],
    Assign => Assign Stack [PUT_REFERENCE],
    AssignPush => Assign Stack [PUT_REFERENCE | PUT_STACK],
    AssignBlock => Assign Stack [PUT_REFERENCE | PUT_BLOCK],
    AssignPropThis => AssignPropThis ThisLiteral,

    SetProperty => SetProperty StackLiteral,
    SetComputedProperty => SetComputedProperty StackStack,
    SetGetter => SetAccessor StackLiteral,
    SetSetter => SetAccessor StackLiteral,
    SetProto => SetProto Stack,

    PropGet => PropGet StackStack [PUT_STACK],
    PropLitGet => PropGet StackLiteral [PUT_STACK],
    PropReference => PropReference None,
    PropLitReference => PropLitReference Literal,
    PropDelete => PropDelete StackStack [PUT_STACK],
    Delete => DeleteIdent None [PUT_STACK],

    Add => Add StackStack [PUT_STACK],
    Sub => Sub StackStack [PUT_STACK],
    Mul => Mul StackStack [PUT_STACK],
    Div => Div StackStack [PUT_STACK],
    Mod => Mod StackStack [PUT_STACK],
    Exp => Exp StackStack [PUT_STACK],
    BitOr => BitOr StackStack [PUT_STACK],
    BitXor => BitXor StackStack [PUT_STACK],
    BitAnd => BitAnd StackStack [PUT_STACK],
    LeftShift => LeftShift StackStack [PUT_STACK],
    RightShift => RightShift StackStack [PUT_STACK],
    UnsRightShift => UnsRightShift StackStack [PUT_STACK],
    BitNot => BitNot Stack [PUT_STACK],
    Not => Not Stack [PUT_STACK],
    Plus => Plus Stack [PUT_STACK],
    Minus => Minus Stack [PUT_STACK],
    Void => Void Stack [PUT_STACK],

    Less => Less StackStack [PUT_STACK],
    Greater => Greater StackStack [PUT_STACK],
    LessEqual => LessEqual StackStack [PUT_STACK],
    GreaterEqual => GreaterEqual StackStack [PUT_STACK],
    Equal => Equal StackStack [PUT_STACK],
    NotEqual => NotEqual StackStack [PUT_STACK],
    StrictEqual => StrictEqual StackStack [PUT_STACK],
    StrictNotEqual => StrictNotEqual StackStack [PUT_STACK],
    In => In StackStack [PUT_STACK],
    InstanceOf => InstanceOf StackStack [PUT_STACK],

    PreIncr => PreIncr None [PUT_REFERENCE],
    PreIncrPush => PreIncr None [PUT_REFERENCE | PUT_STACK],
    PreDecr => PreDecr None [PUT_REFERENCE],
    PreDecrPush => PreDecr None [PUT_REFERENCE | PUT_STACK],
    PostIncr => PostIncr None [PUT_REFERENCE],
    PostIncrPush => PostIncr None [PUT_REFERENCE | PUT_STACK],
    PostDecr => PostDecr None [PUT_REFERENCE],
    PostDecrPush => PostDecr None [PUT_REFERENCE | PUT_STACK],

    Jump => Jump Branch1,
    Jump2 => Jump Branch2,
    Jump3 => Jump Branch3,
    JumpBack => Jump Branch1 [BACKWARD_BRANCH],
    JumpBack2 => Jump Branch2 [BACKWARD_BRANCH],
    JumpBack3 => Jump Branch3 [BACKWARD_BRANCH],
    BranchIfTrue => BranchIfTrue Branch1,
    BranchIfTrue2 => BranchIfTrue Branch2,
    BranchIfTrue3 => BranchIfTrue Branch3,
    BranchIfFalse => BranchIfFalse Branch1,
    BranchIfFalse2 => BranchIfFalse Branch2,
    BranchIfFalse3 => BranchIfFalse Branch3,
    BranchIfTrueBack => BranchIfTrue Branch1 [BACKWARD_BRANCH],
    BranchIfTrueBack2 => BranchIfTrue Branch2 [BACKWARD_BRANCH],
    BranchIfTrueBack3 => BranchIfTrue Branch3 [BACKWARD_BRANCH],
    BranchIfFalseBack => BranchIfFalse Branch1 [BACKWARD_BRANCH],
    BranchIfFalseBack2 => BranchIfFalse Branch2 [BACKWARD_BRANCH],
    BranchIfFalseBack3 => BranchIfFalse Branch3 [BACKWARD_BRANCH],
    BranchIfLogicalTrue => BranchIfLogicalTrue Branch1,
    BranchIfLogicalTrue2 => BranchIfLogicalTrue Branch2,
    BranchIfLogicalTrue3 => BranchIfLogicalTrue Branch3,
    BranchIfLogicalFalse => BranchIfLogicalFalse Branch1,
    BranchIfLogicalFalse2 => BranchIfLogicalFalse Branch2,
    BranchIfLogicalFalse3 => BranchIfLogicalFalse Branch3,
    BranchIfStrictEqual => BranchIfStrictEqual Branch1,
    BranchIfStrictEqual2 => BranchIfStrictEqual Branch2,
    BranchIfStrictEqual3 => BranchIfStrictEqual Branch3,
    ExitContext => JumpAndExitContext Branch1,
    ExitContext2 => JumpAndExitContext Branch2,
    ExitContext3 => JumpAndExitContext Branch3,

    Try => TryContext Branch1,
    Try2 => TryContext Branch2,
    Try3 => TryContext Branch3,
    Catch => CatchJump Branch1,
    Catch2 => CatchJump Branch2,
    Catch3 => CatchJump Branch3,
    Finally => FinallyContext Branch1,
    Finally2 => FinallyContext Branch2,
    Finally3 => FinallyContext Branch3,
    With => WithContext Branch1,
    With2 => WithContext Branch2,
    With3 => WithContext Branch3,
    BlockContext => BlockCreateContext Branch1,
    BlockContext2 => BlockCreateContext Branch2,
    BlockContext3 => BlockCreateContext Branch3,
    ForInInit => ForInCreateContext Branch1,
    ForInInit2 => ForInCreateContext Branch2,
    ForInInit3 => ForInCreateContext Branch3,
    ForOfInit => ForOfCreateContext Branch1,
    ForOfInit2 => ForOfCreateContext Branch2,
    ForOfInit3 => ForOfCreateContext Branch3,
    ForInNext => ForInHasNext Branch1 [BACKWARD_BRANCH],
    ForInNext2 => ForInHasNext Branch2 [BACKWARD_BRANCH],
    ForInNext3 => ForInHasNext Branch3 [BACKWARD_BRANCH],
    ForOfNext => ForOfHasNext Branch1 [BACKWARD_BRANCH],
    ForOfNext2 => ForOfHasNext Branch2 [BACKWARD_BRANCH],
    ForOfNext3 => ForOfHasNext Branch3 [BACKWARD_BRANCH],
    ContextEnd => ContextEnd None,
    ForInGetNext => ForInGetNext None [PUT_STACK],
    ForOfGetNext => ForOfGetNext None [PUT_STACK],

    Call0 => Call None,
    Call1 => Call None,
    Call2 => Call None,
    Call3 => Call None,
    /// Argument byte: argument count.
    CallN => Call None,
    Call0Push => Call None [PUT_STACK],
    Call1Push => Call None [PUT_STACK],
    Call2Push => Call None [PUT_STACK],
    Call3Push => Call None [PUT_STACK],
    CallNPush => Call None [PUT_STACK],
    Call0Block => Call None [PUT_BLOCK],
    Call1Block => Call None [PUT_BLOCK],
    Call2Block => Call None [PUT_BLOCK],
    Call3Block => Call None [PUT_BLOCK],
    CallNBlock => Call None [PUT_BLOCK],
    Call0Prop => Call None,
    Call1Prop => Call None,
    Call2Prop => Call None,
    Call3Prop => Call None,
    CallNProp => Call None,
    Call0PropPush => Call None [PUT_STACK],
    Call1PropPush => Call None [PUT_STACK],
    Call2PropPush => Call None [PUT_STACK],
    Call3PropPush => Call None [PUT_STACK],
    CallNPropPush => Call None [PUT_STACK],
    Call0PropBlock => Call None [PUT_BLOCK],
    Call1PropBlock => Call None [PUT_BLOCK],
    Call2PropBlock => Call None [PUT_BLOCK],
    Call3PropBlock => Call None [PUT_BLOCK],
    CallNPropBlock => Call None [PUT_BLOCK],
    New0 => Construct None [PUT_STACK],
    New1 => Construct None [PUT_STACK],
    New2 => Construct None [PUT_STACK],
    New3 => Construct None [PUT_STACK],
    NewN => Construct None [PUT_STACK],

    Return => Return Stack,
    ReturnWithBlock => ReturnWithBlock None,
    ReturnWithLiteral => Return Literal,
    Throw => Throw Stack,

    ResolveBaseForCall => ResolveBaseForCall None,
    DirectEval => DirectEval None,
}

define_opcodes! {
    /// Extended opcode set, reached through the [`Opcode::Ext`] prefix.
    ExtOpcode, EXT_TABLE, EXT_COUNT:

    PushNewTarget => PushNewTarget None [PUT_STACK],
    PushSpreadElement => PushSpreadElement None [PUT_STACK],

    CreateGenerator => CreateGenerator None,
    Yield => Yield None,
    Await => Await None,
    ExtReturn => Return Stack,
    ReturnPromise => ReturnPromise Stack,

    /// Argument byte: argument count.
    SuperCall => SuperCall None,
    SpreadSuperCall => SuperCall None,
    SpreadCall => SpreadArguments None,
    SpreadCallPush => SpreadArguments None [PUT_STACK],
    SpreadCallBlock => SpreadArguments None [PUT_BLOCK],
    SpreadCallProp => SpreadArguments None,
    SpreadCallPropPush => SpreadArguments None [PUT_STACK],
    SpreadCallPropBlock => SpreadArguments None [PUT_BLOCK],
    SpreadNew => SpreadArguments None [PUT_STACK],

    GetIterator => GetIterator None [PUT_STACK],
    IteratorStep => IteratorStep None [PUT_STACK],
    IteratorStep2 => IteratorStep None [PUT_STACK],
    IteratorStep3 => IteratorStep None [PUT_STACK],
    IteratorClose => IteratorClose Stack,
    DefaultInitializer => DefaultInitializer Branch1,
    DefaultInitializer2 => DefaultInitializer Branch2,
    DefaultInitializer3 => DefaultInitializer Branch3,
    RestInitializer => RestInitializer None [PUT_STACK],
    RestInitializer2 => RestInitializer None [PUT_STACK],
    RestInitializer3 => RestInitializer None [PUT_STACK],
    InitializerPushProp => InitializerPushProp Literal [PUT_STACK],
    RequireObjectCoercible => RequireObjectCoercible None,

    TryCreateEnv => TryCreateEnv None,
    CloneContext => CloneContext None,
    CloneFullContext => CloneContext None,
    /// Argument byte: eval parse options applied to the following call.
    VarEval => VarEval None,
    ExtVarEval => VarEval None,

    SetComputedGetter => SetComputedAccessor StackStack,
    SetComputedSetter => SetComputedAccessor StackStack,

    PushClassEnvironment => PushClassEnvironment Literal,
    PushImplicitCtor => PushImplicitCtor None [PUT_STACK],
    PushImplicitDerivedCtor => PushImplicitCtor None [PUT_STACK],
    InitClass => InitClass None,
    FinalizeClass => FinalizeClass Literal [PUT_STACK],
    PushSuperConstructor => PushSuperConstructor None [PUT_STACK],
    ResolveLexicalThis => ResolveLexicalThis None [PUT_STACK],
    SuperReference => SuperReference Literal [PUT_STACK],
}

pub const TOTAL_OPCODES: usize = PRIMARY_COUNT + EXT_COUNT;

/// The flat decode table: primary opcodes, then extended opcodes.
pub static DECODE_TABLE: [DecodeEntry; TOTAL_OPCODES] = {
    let mut table = [DecodeEntry::new(OpGroup::Nop, OperandShape::None, 0); TOTAL_OPCODES];
    let mut i = 0;
    while i < PRIMARY_COUNT {
        table[i] = PRIMARY_TABLE[i];
        i += 1;
    }
    let mut i = 0;
    while i < EXT_COUNT {
        table[PRIMARY_COUNT + i] = EXT_TABLE[i];
        i += 1;
    }
    table
};

/// Effective opcode: a primary opcode or an `Ext`-prefixed extended opcode,
/// usable as a direct index into [`DECODE_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveOpcode {
    Primary(Opcode),
    Extended(ExtOpcode),
}

impl EffectiveOpcode {
    pub fn index(self) -> usize {
        match self {
            EffectiveOpcode::Primary(op) => op as usize,
            EffectiveOpcode::Extended(op) => PRIMARY_COUNT + op as usize,
        }
    }

    pub fn decode(self) -> DecodeEntry {
        DECODE_TABLE[self.index()]
    }
}

impl Opcode {
    /// Fixed argument count of the compressed call forms; `None` for the
    /// variable-arity forms, which carry an argument-count byte.
    pub fn fixed_argc(self) -> Option<u8> {
        use Opcode::*;
        match self {
            Call0 | Call0Push | Call0Block | Call0Prop | Call0PropPush | Call0PropBlock | New0 => Some(0),
            Call1 | Call1Push | Call1Block | Call1Prop | Call1PropPush | Call1PropBlock | New1 => Some(1),
            Call2 | Call2Push | Call2Block | Call2Prop | Call2PropPush | Call2PropBlock | New2 => Some(2),
            Call3 | Call3Push | Call3Block | Call3Prop | Call3PropPush | Call3PropBlock | New3 => Some(3),
            _ => None,
        }
    }

    /// Property-call forms expect `[this, callee, args..]` on the stack.
    pub fn is_prop_call(self) -> bool {
        (Opcode::Call0Prop..=Opcode::CallNPropBlock).contains(&self)
    }
}

impl ExtOpcode {
    /// Stack depth of the iterator operated on by `ITERATOR_STEP[_2, _3]`.
    pub fn iterator_depth(self) -> usize {
        match self {
            ExtOpcode::IteratorStep | ExtOpcode::RestInitializer => 1,
            ExtOpcode::IteratorStep2 | ExtOpcode::RestInitializer2 => 2,
            ExtOpcode::IteratorStep3 | ExtOpcode::RestInitializer3 => 3,
            _ => unreachable!("not an iterator opcode"),
        }
    }

    pub fn is_prop_call(self) -> bool {
        matches!(
            self,
            ExtOpcode::SpreadCallProp | ExtOpcode::SpreadCallPropPush | ExtOpcode::SpreadCallPropBlock
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_opcode() {
        assert_eq!(DECODE_TABLE.len(), PRIMARY_COUNT + EXT_COUNT);
        // Only the prefix byte may map to the Nop group.
        for (i, entry) in DECODE_TABLE.iter().enumerate() {
            if i != Opcode::Ext as usize {
                assert_ne!(entry.group(), OpGroup::Nop, "opcode {i} has no semantics");
            }
        }
    }

    #[test]
    fn branch_families_are_width_ordered() {
        for base in [Opcode::Jump, Opcode::Try, Opcode::Catch, Opcode::Finally, Opcode::ForInNext] {
            for width in 0..3u8 {
                let op = Opcode::from_repr(base as u8 + width).unwrap();
                let entry = EffectiveOpcode::Primary(op).decode();
                assert_eq!(entry.shape().branch_length(), Some(width + 1));
                assert_eq!(entry.group(), EffectiveOpcode::Primary(base).decode().group());
            }
        }
    }

    #[test]
    fn decode_entry_roundtrip() {
        let entry = DecodeEntry::new(
            OpGroup::Assign,
            OperandShape::Stack,
            DecodeEntry::PUT_REFERENCE | DecodeEntry::PUT_STACK,
        );
        assert_eq!(entry.group(), OpGroup::Assign);
        assert_eq!(entry.shape(), OperandShape::Stack);
        assert!(entry.put_reference() && entry.put_stack());
        assert!(!entry.put_ident() && !entry.put_block());
        assert!(!entry.is_backward_branch());
    }

    #[test]
    fn call_family_metadata() {
        assert_eq!(Opcode::Call2PropPush.fixed_argc(), Some(2));
        assert_eq!(Opcode::CallN.fixed_argc(), None);
        assert!(Opcode::Call0Prop.is_prop_call());
        assert!(!Opcode::Call0.is_prop_call());
        assert_eq!(ExtOpcode::IteratorStep3.iterator_depth(), 3);
    }
}
