use std::fmt;

/// Structurally unreadable class file
///
/// Raised by the class-file reader when the input cannot even be parsed into a [`ClassFile`]:
/// wrong magic, truncated constant pool, dangling pool index, and so on. This is fatal for the
/// whole file, unlike a [`ConstraintViolation`] which rejects a single method.
///
/// [`ClassFile`]: crate::class_file::ClassFile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedClassError {
    /// Byte offset into the class file at which parsing failed
    pub offset: usize,

    pub message: String,
}

impl MalformedClassError {
    pub fn new(offset: usize, message: impl Into<String>) -> MalformedClassError {
        MalformedClassError {
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for MalformedClassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed class file at byte {}: {}",
            self.offset, self.message
        )
    }
}

impl std::error::Error for MalformedClassError {}

/// Catalog of named verification constraints
///
/// Every rejection carries exactly one of these, regardless of which stage detected it (the
/// bytecode decoder, the control-flow builder, the structural rule set, or the frame transfer
/// functions).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RuleId {
    /// Code array is 65536 bytes or more
    CodeTooLarge,

    /// Branch, switch, or handler target is out of range or inside an instruction
    IllegalBranchTarget,

    /// Operand stack underflow or overflow of `max_stack`
    StackBounds,

    /// Local slot read/write with the wrong category or out of `max_locals` bounds
    LocalSlotType,

    /// Stack operand has the wrong type or category for the instruction
    OperandType,

    /// Incompatible frames meet at a control-flow join
    FrameMergeConflict,

    /// Structurally unbalanced `monitorenter`/`monitorexit`
    MonitorBalance,

    /// `jsr`/`ret` discipline broken (reentrant entry, unmatched `ret`)
    Subroutine,

    /// `this` used or leaked before `<init>` ran on every path
    UninitializedThis,

    /// Reserved or undefined opcode, or an otherwise undecodable instruction
    IllegalOpcode,

    /// Return instruction disagrees with the method descriptor, or execution can
    /// fall off the end of the code array
    ReturnType,

    /// Constant pool operand of an instruction has the wrong tag or is unusable
    ConstantPoolType,
}

impl RuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::CodeTooLarge => "code-too-large",
            RuleId::IllegalBranchTarget => "illegal-branch-target",
            RuleId::StackBounds => "stack-bounds",
            RuleId::LocalSlotType => "local-slot-type",
            RuleId::OperandType => "operand-type",
            RuleId::FrameMergeConflict => "frame-merge-conflict",
            RuleId::MonitorBalance => "monitor-balance",
            RuleId::Subroutine => "subroutine",
            RuleId::UninitializedThis => "uninitialized-this",
            RuleId::IllegalOpcode => "illegal-opcode",
            RuleId::ReturnType => "return-type",
            RuleId::ConstantPoolType => "constant-pool-type",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single broken constraint, pinned to the code offset that broke it
///
/// The first violation found (in lowest-offset-first traversal order) rejects the method; sibling
/// methods are verified independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub rule: RuleId,

    /// Byte offset into the method's code array
    pub offset: u32,

    pub message: String,
}

impl ConstraintViolation {
    pub fn new(rule: RuleId, offset: u32, message: impl Into<String>) -> ConstraintViolation {
        ConstraintViolation {
            rule,
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}: {}", self.rule, self.offset, self.message)
    }
}

impl std::error::Error for ConstraintViolation {}
