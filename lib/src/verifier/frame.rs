use crate::class_file::{ConstantPool, LoadableConstant};
use crate::code::{ArrayPrimitive, BranchInsn, Insn, InvokeType};
use crate::descriptors::{
    ArrayType, BaseType, FieldType, MethodDescriptor, ParseDescriptor, RefType,
};
use crate::errors::{ConstraintViolation, RuleId};
use crate::util::{OffsetVec, Width};
use crate::verifier::types::{
    class_entry_type, element_type, VerificationType, JAVA_LANG_CLASS, JAVA_LANG_OBJECT,
    JAVA_LANG_STRING, METHOD_HANDLE, METHOD_TYPE,
};

/// Everything about the enclosing method that a transfer function can need
pub struct MethodContext<'a> {
    pub pool: &'a ConstantPool,

    /// Binary name of the class being verified
    pub class_name: &'a str,

    /// Binary name of the direct superclass; `None` for java/lang/Object
    pub super_name: Option<&'a str>,

    pub method_name: &'a str,
    pub return_type: Option<FieldType<String>>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub strict_monitors: bool,
}

impl MethodContext<'_> {
    pub fn is_init(&self) -> bool {
        self.method_name == "<init>"
    }
}

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// The interpreter keeps one frame per basic-block entry and pushes a clone of it through the
/// block's instructions; each instruction's transfer function asserts its preconditions against
/// the frame and rewrites it.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType>,

    /// Local variable slots; always exactly `max_locals` entries, unusable ones hold `Top`
    pub locals: Vec<VerificationType>,

    /// Structural `monitorenter` depth; only tracked under strict monitor checking
    pub monitors: u32,

    /// Entries of the subroutines currently active on this path, outermost first
    pub active_subroutines: Vec<u32>,

    /// Set while `<init>` has not yet run on some path reaching this point
    ///
    /// Tracked separately from the `UninitializedThis` slots because a merge can widen those
    /// away (into an unusable `Top`) while the obligation to call `<init>` remains.
    pub this_uninitialized: bool,
}

impl Frame {
    /// The frame on entry to a method: parameters in the locals, empty stack
    pub fn initial(
        is_static: bool,
        descriptor: &MethodDescriptor<String>,
        cx: &MethodContext<'_>,
    ) -> Result<Frame, ConstraintViolation> {
        let mut locals: Vec<VerificationType> = vec![];

        if !is_static {
            // `this` starts uninitialized in every constructor except java/lang/Object's
            if cx.is_init() && cx.class_name != JAVA_LANG_OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::object(cx.class_name));
            }
        }

        for parameter in &descriptor.parameters {
            let parameter_type = VerificationType::from(parameter.clone());
            let is_wide = parameter_type.width() == 2;
            locals.push(parameter_type);
            if is_wide {
                locals.push(VerificationType::Top);
            }
        }

        if locals.len() > cx.max_locals as usize {
            return Err(ConstraintViolation::new(
                RuleId::LocalSlotType,
                0,
                format!(
                    "method parameters need {} local slots but max_locals is {}",
                    locals.len(),
                    cx.max_locals
                ),
            ));
        }
        locals.resize(cx.max_locals as usize, VerificationType::Top);
        let this_uninitialized = locals.first() == Some(&VerificationType::UninitializedThis);

        Ok(Frame {
            stack: OffsetVec::new(),
            locals,
            monitors: 0,
            active_subroutines: vec![],
            this_uninitialized,
        })
    }

    /// Do the locals still hold an uninitialized `this`?
    pub fn has_uninitialized_this(&self) -> bool {
        self.locals
            .iter()
            .any(|slot| *slot == VerificationType::UninitializedThis)
            || self
                .stack
                .iter()
                .any(|(_, _, slot)| *slot == VerificationType::UninitializedThis)
    }

    fn push(
        &mut self,
        value: VerificationType,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        if self.stack.offset_len().0 + value.width() > cx.max_stack as usize {
            return Err(ConstraintViolation::new(
                RuleId::StackBounds,
                offset,
                format!(
                    "pushing {:?} would exceed max_stack {}",
                    value, cx.max_stack
                ),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, offset: u32) -> Result<VerificationType, ConstraintViolation> {
        self.stack.pop().map(|(_, _, value)| value).ok_or_else(|| {
            ConstraintViolation::new(RuleId::StackBounds, offset, "pop from an empty operand stack")
        })
    }

    /// Pop a value that can stand in for `expected`
    fn pop_expecting(
        &mut self,
        expected: &VerificationType,
        offset: u32,
    ) -> Result<VerificationType, ConstraintViolation> {
        let found = self.pop(offset)?;
        if VerificationType::is_assignable(&found, expected) {
            Ok(found)
        } else {
            Err(ConstraintViolation::new(
                RuleId::OperandType,
                offset,
                format!("found {:?} on the stack but expected {:?}", found, expected),
            ))
        }
    }

    fn pop_expecting_width(
        &mut self,
        expected_width: usize,
        offset: u32,
    ) -> Result<VerificationType, ConstraintViolation> {
        let found = self.pop(offset)?;
        if found.width() == expected_width {
            Ok(found)
        } else {
            Err(ConstraintViolation::new(
                RuleId::OperandType,
                offset,
                format!(
                    "found {:?} on the stack but expected a category-{} value",
                    found,
                    if expected_width == 2 { 2 } else { 1 }
                ),
            ))
        }
    }

    fn pop_reference(&mut self, offset: u32) -> Result<VerificationType, ConstraintViolation> {
        let found = self.pop(offset)?;
        if found.is_reference() {
            Ok(found)
        } else {
            Err(ConstraintViolation::new(
                RuleId::OperandType,
                offset,
                format!("found {:?} on the stack but expected a reference", found),
            ))
        }
    }

    /// Pop a reference that has already been initialized
    fn pop_initialized_reference(
        &mut self,
        offset: u32,
    ) -> Result<VerificationType, ConstraintViolation> {
        let found = self.pop_reference(offset)?;
        match found {
            VerificationType::UninitializedThis | VerificationType::Uninitialized { .. } => {
                Err(ConstraintViolation::new(
                    RuleId::UninitializedThis,
                    offset,
                    "reference is not initialized yet",
                ))
            }
            initialized => Ok(initialized),
        }
    }

    fn local(
        &self,
        index: u16,
        offset: u32,
    ) -> Result<&VerificationType, ConstraintViolation> {
        self.locals.get(index as usize).ok_or_else(|| {
            ConstraintViolation::new(
                RuleId::LocalSlotType,
                offset,
                format!(
                    "local index {} exceeds max_locals {}",
                    index,
                    self.locals.len()
                ),
            )
        })
    }

    /// Read a local slot expecting an exact primitive type, checking the paired slot of
    /// category-2 values
    fn load_local(
        &mut self,
        index: u16,
        expected: VerificationType,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        let found = self.local(index, offset)?;
        if *found != expected {
            return Err(ConstraintViolation::new(
                RuleId::LocalSlotType,
                offset,
                format!(
                    "local {} holds {:?} but the instruction needs {:?}",
                    index, found, expected
                ),
            ));
        }
        if expected.width() == 2 {
            let second = self.local(index + 1, offset)?;
            if *second != VerificationType::Top {
                return Err(ConstraintViolation::new(
                    RuleId::LocalSlotType,
                    offset,
                    format!("second slot of the category-2 value in local {} is in use", index),
                ));
            }
        }
        self.push(expected, cx, offset)
    }

    /// Overwrite a local slot, invalidating any category-2 value it overlaps
    fn store_local(
        &mut self,
        index: u16,
        value: VerificationType,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        let index = index as usize;
        let width = value.width();
        if index + width > self.locals.len() {
            return Err(ConstraintViolation::new(
                RuleId::LocalSlotType,
                offset,
                format!(
                    "storing into local {} needs {} slots but max_locals is {}",
                    index,
                    width,
                    self.locals.len()
                ),
            ));
        }

        // Clobbering the second slot of a category-2 value kills the whole value
        if index > 0
            && matches!(
                self.locals[index - 1],
                VerificationType::Long | VerificationType::Double
            )
        {
            self.locals[index - 1] = VerificationType::Top;
        }

        self.locals[index] = value;
        if width == 2 {
            self.locals[index + 1] = VerificationType::Top;
        }
        Ok(())
    }

    /// Rewrite every occurrence of `original` in the stack and locals
    ///
    /// Used when `<init>` runs: the one uninitialized value it consumed may have been duplicated
    /// anywhere, and all its aliases become initialized at once.
    fn replace_all(&mut self, original: &VerificationType, replacement: VerificationType) {
        let stack = std::mem::take(&mut self.stack);
        self.stack = stack
            .into_iter()
            .map(|(_, _, value)| {
                if value == *original {
                    replacement.clone()
                } else {
                    value
                }
            })
            .collect();

        for slot in self.locals.iter_mut() {
            if *slot == *original {
                *slot = replacement.clone();
            }
        }
    }

    /// Update the frame to reflect the effects of the given (non-branching) instruction
    pub fn execute(
        &mut self,
        insn: &Insn,
        offset: u32,
        cx: &MethodContext<'_>,
    ) -> Result<(), ConstraintViolation> {
        use Insn::*;
        use VerificationType as V;

        match insn {
            Nop => (),
            AConstNull => self.push(V::Null, cx, offset)?,
            IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
                self.push(V::Integer, cx, offset)?;
            }
            LConst0 | LConst1 => self.push(V::Long, cx, offset)?,
            FConst0 | FConst1 | FConst2 => self.push(V::Float, cx, offset)?,
            DConst0 | DConst1 => self.push(V::Double, cx, offset)?,
            BiPush(_) | SiPush(_) => self.push(V::Integer, cx, offset)?,

            Ldc(index) => {
                let pushed = match cx.pool.loadable(*index) {
                    Some(LoadableConstant::Integer) => V::Integer,
                    Some(LoadableConstant::Float) => V::Float,
                    Some(LoadableConstant::String) => V::object(JAVA_LANG_STRING),
                    Some(LoadableConstant::Class) => V::object(JAVA_LANG_CLASS),
                    Some(LoadableConstant::MethodHandle) => V::object(METHOD_HANDLE),
                    Some(LoadableConstant::MethodType) => V::object(METHOD_TYPE),
                    Some(LoadableConstant::Long) | Some(LoadableConstant::Double) => {
                        return Err(self.pool_type(*index, "a category-1 loadable constant", cx, offset))
                    }
                    None => {
                        return Err(self.pool_type(*index, "a loadable constant", cx, offset))
                    }
                };
                self.push(pushed, cx, offset)?;
            }
            Ldc2(index) => {
                let pushed = match cx.pool.loadable(*index) {
                    Some(LoadableConstant::Long) => V::Long,
                    Some(LoadableConstant::Double) => V::Double,
                    _ => {
                        return Err(self.pool_type(*index, "a Long or Double constant", cx, offset))
                    }
                };
                self.push(pushed, cx, offset)?;
            }

            ILoad(index) => self.load_local(*index, V::Integer, cx, offset)?,
            LLoad(index) => self.load_local(*index, V::Long, cx, offset)?,
            FLoad(index) => self.load_local(*index, V::Float, cx, offset)?,
            DLoad(index) => self.load_local(*index, V::Double, cx, offset)?,
            ALoad(index) => {
                let found = self.local(*index, offset)?.clone();
                if !found.is_reference() {
                    return Err(ConstraintViolation::new(
                        RuleId::LocalSlotType,
                        offset,
                        format!(
                            "local {} holds {:?} but the instruction needs a reference",
                            index, found
                        ),
                    ));
                }
                self.push(found, cx, offset)?;
            }

            IALoad => self.array_load(FieldType::int(), V::Integer, cx, offset)?,
            LALoad => self.array_load(FieldType::long(), V::Long, cx, offset)?,
            FALoad => self.array_load(FieldType::float(), V::Float, cx, offset)?,
            DALoad => self.array_load(FieldType::double(), V::Double, cx, offset)?,
            CALoad => self.array_load(FieldType::char(), V::Integer, cx, offset)?,
            SALoad => self.array_load(FieldType::short(), V::Integer, cx, offset)?,
            BALoad => {
                self.pop_expecting(&V::Integer, offset)?;
                let array = self.pop(offset)?;
                if !is_byte_or_boolean_array(&array) {
                    return Err(ConstraintViolation::new(
                        RuleId::OperandType,
                        offset,
                        format!("found {:?} but baload needs a byte or boolean array", array),
                    ));
                }
                self.push(V::Integer, cx, offset)?;
            }
            AALoad => {
                self.pop_expecting(&V::Integer, offset)?;
                let array = self.pop(offset)?;
                match array {
                    V::Null => self.push(V::Null, cx, offset)?,
                    V::Object(ref array_type) => match element_type(array_type) {
                        Some(FieldType::Ref(element)) => {
                            self.push(V::Object(element), cx, offset)?
                        }
                        _ => {
                            return Err(ConstraintViolation::new(
                                RuleId::OperandType,
                                offset,
                                format!("found {:?} but aaload needs an array of references", array),
                            ))
                        }
                    },
                    other => {
                        return Err(ConstraintViolation::new(
                            RuleId::OperandType,
                            offset,
                            format!("found {:?} but aaload needs an array of references", other),
                        ))
                    }
                }
            }

            IStore(index) => {
                self.pop_expecting(&V::Integer, offset)?;
                self.store_local(*index, V::Integer, offset)?;
            }
            LStore(index) => {
                self.pop_expecting(&V::Long, offset)?;
                self.store_local(*index, V::Long, offset)?;
            }
            FStore(index) => {
                self.pop_expecting(&V::Float, offset)?;
                self.store_local(*index, V::Float, offset)?;
            }
            DStore(index) => {
                self.pop_expecting(&V::Double, offset)?;
                self.store_local(*index, V::Double, offset)?;
            }
            AStore(index) => {
                // `astore` also accepts the return address pushed by `jsr`
                let value = self.pop(offset)?;
                if !value.is_reference() && !matches!(value, V::ReturnAddress { .. }) {
                    return Err(ConstraintViolation::new(
                        RuleId::OperandType,
                        offset,
                        format!("found {:?} but astore needs a reference or return address", value),
                    ));
                }
                self.store_local(*index, value, offset)?;
            }

            IAStore => self.array_store(FieldType::int(), V::Integer, offset)?,
            LAStore => self.array_store(FieldType::long(), V::Long, offset)?,
            FAStore => self.array_store(FieldType::float(), V::Float, offset)?,
            DAStore => self.array_store(FieldType::double(), V::Double, offset)?,
            CAStore => self.array_store(FieldType::char(), V::Integer, offset)?,
            SAStore => self.array_store(FieldType::short(), V::Integer, offset)?,
            BAStore => {
                self.pop_expecting(&V::Integer, offset)?;
                self.pop_expecting(&V::Integer, offset)?;
                let array = self.pop(offset)?;
                if !is_byte_or_boolean_array(&array) {
                    return Err(ConstraintViolation::new(
                        RuleId::OperandType,
                        offset,
                        format!("found {:?} but bastore needs a byte or boolean array", array),
                    ));
                }
            }
            AAStore => {
                // Element compatibility is re-checked at runtime (ArrayStoreException), so only
                // the shapes are verified here
                self.pop_initialized_reference(offset)?;
                self.pop_expecting(&V::Integer, offset)?;
                let array = self.pop(offset)?;
                match &array {
                    V::Null => (),
                    V::Object(array_type) => match element_type(array_type) {
                        Some(FieldType::Ref(_)) => (),
                        _ => {
                            return Err(ConstraintViolation::new(
                                RuleId::OperandType,
                                offset,
                                format!("found {:?} but aastore needs an array of references", array),
                            ))
                        }
                    },
                    other => {
                        return Err(ConstraintViolation::new(
                            RuleId::OperandType,
                            offset,
                            format!("found {:?} but aastore needs an array of references", other),
                        ))
                    }
                }
            }

            Pop => {
                self.pop_expecting_width(1, offset)?;
            }
            Pop2 => {
                let top = self.pop(offset)?;
                if top.width() == 1 {
                    self.pop_expecting_width(1, offset)?;
                }
            }
            Dup => {
                let top = self.pop_expecting_width(1, offset)?;
                self.push(top.clone(), cx, offset)?;
                self.push(top, cx, offset)?;
            }
            DupX1 => {
                let first = self.pop_expecting_width(1, offset)?;
                let second = self.pop_expecting_width(1, offset)?;
                self.push(first.clone(), cx, offset)?;
                self.push(second, cx, offset)?;
                self.push(first, cx, offset)?;
            }
            DupX2 => {
                let first = self.pop_expecting_width(1, offset)?;
                let second = self.pop(offset)?;
                if second.width() == 1 {
                    let third = self.pop_expecting_width(1, offset)?;
                    self.push(first.clone(), cx, offset)?;
                    self.push(third, cx, offset)?;
                    self.push(second, cx, offset)?;
                    self.push(first, cx, offset)?;
                } else {
                    self.push(first.clone(), cx, offset)?;
                    self.push(second, cx, offset)?;
                    self.push(first, cx, offset)?;
                }
            }
            Dup2 => {
                let first = self.pop(offset)?;
                if first.width() == 1 {
                    let second = self.pop_expecting_width(1, offset)?;
                    self.push(second.clone(), cx, offset)?;
                    self.push(first.clone(), cx, offset)?;
                    self.push(second, cx, offset)?;
                    self.push(first, cx, offset)?;
                } else {
                    self.push(first.clone(), cx, offset)?;
                    self.push(first, cx, offset)?;
                }
            }
            Dup2X1 => {
                let first = self.pop(offset)?;
                if first.width() == 1 {
                    let second = self.pop_expecting_width(1, offset)?;
                    let third = self.pop_expecting_width(1, offset)?;
                    self.push(second.clone(), cx, offset)?;
                    self.push(first.clone(), cx, offset)?;
                    self.push(third, cx, offset)?;
                    self.push(second, cx, offset)?;
                    self.push(first, cx, offset)?;
                } else {
                    let second = self.pop_expecting_width(1, offset)?;
                    self.push(first.clone(), cx, offset)?;
                    self.push(second, cx, offset)?;
                    self.push(first, cx, offset)?;
                }
            }
            Dup2X2 => {
                let first = self.pop(offset)?;
                if first.width() == 1 {
                    let second = self.pop_expecting_width(1, offset)?;
                    let third = self.pop(offset)?;
                    if third.width() == 1 {
                        let fourth = self.pop_expecting_width(1, offset)?;
                        self.push(second.clone(), cx, offset)?;
                        self.push(first.clone(), cx, offset)?;
                        self.push(fourth, cx, offset)?;
                        self.push(third, cx, offset)?;
                        self.push(second, cx, offset)?;
                        self.push(first, cx, offset)?;
                    } else {
                        self.push(second.clone(), cx, offset)?;
                        self.push(first.clone(), cx, offset)?;
                        self.push(third, cx, offset)?;
                        self.push(second, cx, offset)?;
                        self.push(first, cx, offset)?;
                    }
                } else {
                    let second = self.pop(offset)?;
                    if second.width() == 1 {
                        let third = self.pop_expecting_width(1, offset)?;
                        self.push(first.clone(), cx, offset)?;
                        self.push(third, cx, offset)?;
                        self.push(second, cx, offset)?;
                        self.push(first, cx, offset)?;
                    } else {
                        self.push(first.clone(), cx, offset)?;
                        self.push(second, cx, offset)?;
                        self.push(first, cx, offset)?;
                    }
                }
            }
            Swap => {
                let first = self.pop_expecting_width(1, offset)?;
                let second = self.pop_expecting_width(1, offset)?;
                self.push(first, cx, offset)?;
                self.push(second, cx, offset)?;
            }

            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor => {
                self.pop_expecting(&V::Integer, offset)?;
                self.pop_expecting(&V::Integer, offset)?;
                self.push(V::Integer, cx, offset)?;
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
                self.pop_expecting(&V::Long, offset)?;
                self.pop_expecting(&V::Long, offset)?;
                self.push(V::Long, cx, offset)?;
            }
            FAdd | FSub | FMul | FDiv | FRem => {
                self.pop_expecting(&V::Float, offset)?;
                self.pop_expecting(&V::Float, offset)?;
                self.push(V::Float, cx, offset)?;
            }
            DAdd | DSub | DMul | DDiv | DRem => {
                self.pop_expecting(&V::Double, offset)?;
                self.pop_expecting(&V::Double, offset)?;
                self.push(V::Double, cx, offset)?;
            }

            INeg | I2B | I2C | I2S => {
                self.pop_expecting(&V::Integer, offset)?;
                self.push(V::Integer, cx, offset)?;
            }
            LNeg => {
                self.pop_expecting(&V::Long, offset)?;
                self.push(V::Long, cx, offset)?;
            }
            FNeg => {
                self.pop_expecting(&V::Float, offset)?;
                self.push(V::Float, cx, offset)?;
            }
            DNeg => {
                self.pop_expecting(&V::Double, offset)?;
                self.push(V::Double, cx, offset)?;
            }

            ISh(_) => {
                self.pop_expecting(&V::Integer, offset)?;
                self.pop_expecting(&V::Integer, offset)?;
                self.push(V::Integer, cx, offset)?;
            }
            LSh(_) => {
                self.pop_expecting(&V::Integer, offset)?;
                self.pop_expecting(&V::Long, offset)?;
                self.push(V::Long, cx, offset)?;
            }

            IInc(index, _) => {
                let found = self.local(*index, offset)?;
                if *found != V::Integer {
                    return Err(ConstraintViolation::new(
                        RuleId::LocalSlotType,
                        offset,
                        format!("local {} holds {:?} but iinc needs Integer", index, found),
                    ));
                }
            }

            I2L => self.convert(V::Integer, V::Long, cx, offset)?,
            I2F => self.convert(V::Integer, V::Float, cx, offset)?,
            I2D => self.convert(V::Integer, V::Double, cx, offset)?,
            L2I => self.convert(V::Long, V::Integer, cx, offset)?,
            L2F => self.convert(V::Long, V::Float, cx, offset)?,
            L2D => self.convert(V::Long, V::Double, cx, offset)?,
            F2I => self.convert(V::Float, V::Integer, cx, offset)?,
            F2L => self.convert(V::Float, V::Long, cx, offset)?,
            F2D => self.convert(V::Float, V::Double, cx, offset)?,
            D2I => self.convert(V::Double, V::Integer, cx, offset)?,
            D2L => self.convert(V::Double, V::Long, cx, offset)?,
            D2F => self.convert(V::Double, V::Float, cx, offset)?,

            LCmp => {
                self.pop_expecting(&V::Long, offset)?;
                self.pop_expecting(&V::Long, offset)?;
                self.push(V::Integer, cx, offset)?;
            }
            FCmp(_) => {
                self.pop_expecting(&V::Float, offset)?;
                self.pop_expecting(&V::Float, offset)?;
                self.push(V::Integer, cx, offset)?;
            }
            DCmp(_) => {
                self.pop_expecting(&V::Double, offset)?;
                self.pop_expecting(&V::Double, offset)?;
                self.push(V::Integer, cx, offset)?;
            }

            GetStatic(index) => {
                let field_type = self.field_type(*index, cx, offset)?;
                self.push(V::from(field_type), cx, offset)?;
            }
            PutStatic(index) => {
                let field_type = self.field_type(*index, cx, offset)?;
                self.pop_expecting(&V::from(field_type), offset)?;
            }
            GetField(index) => {
                let field = cx
                    .pool
                    .field_ref(*index)
                    .ok_or_else(|| self.pool_type(*index, "a Fieldref", cx, offset))?;
                let field_class = field.class.to_owned();
                let field_type = self.field_type(*index, cx, offset)?;
                let object = self.pop_initialized_reference(offset)?;
                let expected = V::object(field_class);
                if !VerificationType::is_assignable(&object, &expected) {
                    return Err(ConstraintViolation::new(
                        RuleId::OperandType,
                        offset,
                        format!("found {:?} but getfield expected {:?}", object, expected),
                    ));
                }
                self.push(V::from(field_type), cx, offset)?;
            }
            PutField(index) => {
                let field = cx
                    .pool
                    .field_ref(*index)
                    .ok_or_else(|| self.pool_type(*index, "a Fieldref", cx, offset))?;
                let field_class = field.class.to_owned();
                let field_type = self.field_type(*index, cx, offset)?;
                self.pop_expecting(&V::from(field_type), offset)?;
                let object = self.pop_reference(offset)?;
                match object {
                    // An uninitialized `this` may only touch fields of the class being built
                    V::UninitializedThis => {
                        if field_class != cx.class_name {
                            return Err(ConstraintViolation::new(
                                RuleId::UninitializedThis,
                                offset,
                                format!(
                                    "cannot store to a field of {} before <init> runs",
                                    field_class
                                ),
                            ));
                        }
                    }
                    V::Uninitialized { .. } => {
                        return Err(ConstraintViolation::new(
                            RuleId::UninitializedThis,
                            offset,
                            "cannot store to a field of an uninitialized object",
                        ));
                    }
                    initialized => {
                        let expected = V::object(field_class);
                        if !VerificationType::is_assignable(&initialized, &expected) {
                            return Err(ConstraintViolation::new(
                                RuleId::OperandType,
                                offset,
                                format!("found {:?} but putfield expected {:?}", initialized, expected),
                            ));
                        }
                    }
                }
            }

            Invoke(invoke_type, index) => self.invoke(*invoke_type, *index, cx, offset)?,
            InvokeDynamic(index) => {
                let (_, descriptor) = cx
                    .pool
                    .invoke_dynamic(*index)
                    .ok_or_else(|| self.pool_type(*index, "an InvokeDynamic", cx, offset))?;
                let descriptor = parse_method_descriptor(descriptor, *index, offset)?;
                for parameter in descriptor.parameters.iter().rev() {
                    self.pop_expecting(&V::from(parameter.clone()), offset)?;
                }
                if let Some(return_type) = descriptor.return_type {
                    self.push(V::from(return_type), cx, offset)?;
                }
            }

            New(index) => {
                let class_name = cx
                    .pool
                    .class_name(*index)
                    .ok_or_else(|| self.pool_type(*index, "a Class", cx, offset))?;
                if class_name.starts_with('[') {
                    return Err(ConstraintViolation::new(
                        RuleId::ConstantPoolType,
                        offset,
                        "arrays cannot be constructed with new",
                    ));
                }
                let uninitialized = V::Uninitialized {
                    class: class_name.to_owned(),
                    offset,
                };
                self.push(uninitialized, cx, offset)?;
            }
            NewArray(primitive) => {
                self.pop_expecting(&V::Integer, offset)?;
                let element = match primitive {
                    ArrayPrimitive::Boolean => FieldType::boolean(),
                    ArrayPrimitive::Char => FieldType::char(),
                    ArrayPrimitive::Float => FieldType::float(),
                    ArrayPrimitive::Double => FieldType::double(),
                    ArrayPrimitive::Byte => FieldType::byte(),
                    ArrayPrimitive::Short => FieldType::short(),
                    ArrayPrimitive::Int => FieldType::int(),
                    ArrayPrimitive::Long => FieldType::long(),
                };
                self.push(V::array_of(element), cx, offset)?;
            }
            ANewArray(index) => {
                self.pop_expecting(&V::Integer, offset)?;
                let element = self.class_ref(*index, cx, offset)?;
                self.push(V::array_of(FieldType::Ref(element)), cx, offset)?;
            }
            MultiANewArray(index, dimensions) => {
                let array = self.class_ref(*index, cx, offset)?;
                let declared = match &array {
                    RefType::ObjectArray(arr) => arr.dimensions(),
                    RefType::PrimitiveArray(arr) => arr.dimensions(),
                    RefType::Object(_) => 0,
                };
                if declared < usize::from(*dimensions) {
                    return Err(ConstraintViolation::new(
                        RuleId::ConstantPoolType,
                        offset,
                        format!(
                            "multianewarray of {} dimensions on a type with {}",
                            dimensions, declared
                        ),
                    ));
                }
                for _ in 0..*dimensions {
                    self.pop_expecting(&V::Integer, offset)?;
                }
                self.push(V::Object(array), cx, offset)?;
            }
            ArrayLength => {
                let array = self.pop(offset)?;
                match &array {
                    V::Null => (),
                    V::Object(reference) if reference.is_array() => (),
                    other => {
                        return Err(ConstraintViolation::new(
                            RuleId::OperandType,
                            offset,
                            format!("found {:?} but arraylength needs an array", other),
                        ))
                    }
                }
                self.push(V::Integer, cx, offset)?;
            }

            CheckCast(index) => {
                let target = self.class_ref(*index, cx, offset)?;
                self.pop_initialized_reference(offset)?;
                self.push(V::Object(target), cx, offset)?;
            }
            InstanceOf(index) => {
                self.class_ref(*index, cx, offset)?;
                self.pop_initialized_reference(offset)?;
                self.push(V::Integer, cx, offset)?;
            }

            MonitorEnter => {
                self.pop_initialized_reference(offset)?;
                if cx.strict_monitors {
                    self.monitors += 1;
                }
            }
            MonitorExit => {
                self.pop_initialized_reference(offset)?;
                if cx.strict_monitors {
                    if self.monitors == 0 {
                        return Err(ConstraintViolation::new(
                            RuleId::MonitorBalance,
                            offset,
                            "monitorexit with no structurally held monitor",
                        ));
                    }
                    self.monitors -= 1;
                }
            }
        }

        Ok(())
    }

    /// Update the frame to reflect the effects of the given block terminator
    ///
    /// `jsr` and `ret` are deliberately absent: their effects depend on the successor structure,
    /// so the interpreter handles them when it propagates frames along the edges.
    pub fn execute_branch(
        &mut self,
        branch: &BranchInsn,
        offset: u32,
        cx: &MethodContext<'_>,
    ) -> Result<(), ConstraintViolation> {
        use BranchInsn::*;
        use VerificationType as V;

        match branch {
            If(_, _) => {
                self.pop_expecting(&V::Integer, offset)?;
            }
            IfICmp(_, _) => {
                self.pop_expecting(&V::Integer, offset)?;
                self.pop_expecting(&V::Integer, offset)?;
            }
            IfACmp(_, _) => {
                self.pop_reference(offset)?;
                self.pop_reference(offset)?;
            }
            IfNull(_, _) => {
                self.pop_reference(offset)?;
            }
            Goto(_) | Jsr(_) | Ret(_) => (),
            TableSwitch { .. } | LookupSwitch { .. } => {
                self.pop_expecting(&V::Integer, offset)?;
            }

            IReturn => {
                self.pop_expecting(&V::Integer, offset)?;
                match &cx.return_type {
                    Some(FieldType::Base(
                        BaseType::Int
                        | BaseType::Char
                        | BaseType::Short
                        | BaseType::Byte
                        | BaseType::Boolean,
                    )) => (),
                    other => return Err(self.return_mismatch("ireturn", other, offset)),
                }
                self.check_method_exit(cx, offset)?;
            }
            LReturn => {
                self.pop_expecting(&V::Long, offset)?;
                if cx.return_type != Some(FieldType::long()) {
                    return Err(self.return_mismatch("lreturn", &cx.return_type, offset));
                }
                self.check_method_exit(cx, offset)?;
            }
            FReturn => {
                self.pop_expecting(&V::Float, offset)?;
                if cx.return_type != Some(FieldType::float()) {
                    return Err(self.return_mismatch("freturn", &cx.return_type, offset));
                }
                self.check_method_exit(cx, offset)?;
            }
            DReturn => {
                self.pop_expecting(&V::Double, offset)?;
                if cx.return_type != Some(FieldType::double()) {
                    return Err(self.return_mismatch("dreturn", &cx.return_type, offset));
                }
                self.check_method_exit(cx, offset)?;
            }
            AReturn => {
                let value = self.pop_initialized_reference(offset)?;
                let compatible = match &cx.return_type {
                    Some(FieldType::Ref(declared)) => VerificationType::is_assignable(
                        &value,
                        &V::Object(declared.clone()),
                    ),
                    _ => false,
                };
                if !compatible {
                    return Err(self.return_mismatch("areturn", &cx.return_type, offset));
                }
                self.check_method_exit(cx, offset)?;
            }
            Return => {
                if cx.return_type.is_some() {
                    return Err(self.return_mismatch("return", &cx.return_type, offset));
                }
                self.check_method_exit(cx, offset)?;
            }
            AThrow => {
                // No hierarchy is loaded, so any initialized object passes for Throwable
                self.pop_initialized_reference(offset)?;
            }
        }

        Ok(())
    }

    /// Shared checks for every `return`-family instruction
    fn check_method_exit(
        &self,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        if cx.is_init() && (self.this_uninitialized || self.has_uninitialized_this()) {
            return Err(ConstraintViolation::new(
                RuleId::UninitializedThis,
                offset,
                "constructor returns before calling <init> on this path",
            ));
        }
        if cx.strict_monitors && self.monitors != 0 {
            return Err(ConstraintViolation::new(
                RuleId::MonitorBalance,
                offset,
                format!("method returns with {} monitors structurally held", self.monitors),
            ));
        }
        Ok(())
    }

    /// Enter the subroutine at `entry` via `jsr`: push its return address and mark it active
    ///
    /// Subroutines must not be entered recursively while already active on the current path.
    pub fn enter_subroutine(
        &mut self,
        entry: u32,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        if self.active_subroutines.contains(&entry) {
            return Err(ConstraintViolation::new(
                RuleId::Subroutine,
                offset,
                format!("subroutine at {} is entered recursively", entry),
            ));
        }
        self.push(VerificationType::ReturnAddress { subroutine: entry }, cx, offset)?;
        self.active_subroutines.push(entry);
        Ok(())
    }

    /// Exit a subroutine via `ret`, reading the return address out of a local slot
    ///
    /// Returns the subroutine entry, so the caller can find the matching return sites.
    pub fn exit_subroutine(
        &mut self,
        index: u16,
        offset: u32,
    ) -> Result<u32, ConstraintViolation> {
        let entry = match self.local(index, offset)? {
            VerificationType::ReturnAddress { subroutine } => *subroutine,
            other => {
                return Err(ConstraintViolation::new(
                    RuleId::LocalSlotType,
                    offset,
                    format!(
                        "local {} holds {:?} but ret needs a return address",
                        index, other
                    ),
                ))
            }
        };
        match self
            .active_subroutines
            .iter()
            .position(|active| *active == entry)
        {
            Some(position) => {
                self.active_subroutines.truncate(position);
            }
            None => {
                return Err(ConstraintViolation::new(
                    RuleId::Subroutine,
                    offset,
                    format!("ret exits the subroutine at {}, which is not active", entry),
                ))
            }
        }
        Ok(entry)
    }

    /// Merge an incoming frame into this block-entry frame; `Ok(true)` if anything widened
    pub fn merge_from(
        &mut self,
        incoming: &Frame,
        at: u32,
        strict_monitors: bool,
    ) -> Result<bool, ConstraintViolation> {
        if self.stack.len() != incoming.stack.len()
            || self.stack.offset_len() != incoming.stack.offset_len()
        {
            return Err(ConstraintViolation::new(
                RuleId::FrameMergeConflict,
                at,
                format!(
                    "paths meet with stack depths {} and {}",
                    self.stack.offset_len().0,
                    incoming.stack.offset_len().0
                ),
            ));
        }
        if strict_monitors && self.monitors != incoming.monitors {
            return Err(ConstraintViolation::new(
                RuleId::MonitorBalance,
                at,
                format!(
                    "paths meet with monitor depths {} and {}",
                    self.monitors, incoming.monitors
                ),
            ));
        }

        let mut changed = false;

        let mut merged_stack: OffsetVec<VerificationType> = OffsetVec::new();
        for ((_, _, ours), (_, _, theirs)) in self.stack.iter().zip(incoming.stack.iter()) {
            let merged = VerificationType::merge_stack(ours, theirs).ok_or_else(|| {
                ConstraintViolation::new(
                    RuleId::FrameMergeConflict,
                    at,
                    format!("paths meet with incompatible stack entries {:?} and {:?}", ours, theirs),
                )
            })?;
            if merged != *ours {
                changed = true;
            }
            merged_stack.push(merged);
        }
        self.stack = merged_stack;

        for (ours, theirs) in self.locals.iter_mut().zip(incoming.locals.iter()) {
            let merged = VerificationType::merge_local(ours, theirs);
            if merged != *ours {
                changed = true;
                *ours = merged;
            }
        }

        // The init obligation survives a merge even when the slot types widened away
        if incoming.this_uninitialized && !self.this_uninitialized {
            self.this_uninitialized = true;
            changed = true;
        }

        // A subroutine only stays active if it is active on every path
        let intersection: Vec<u32> = self
            .active_subroutines
            .iter()
            .copied()
            .filter(|entry| incoming.active_subroutines.contains(entry))
            .collect();
        if intersection.len() != self.active_subroutines.len() {
            changed = true;
            self.active_subroutines = intersection;
        }

        Ok(changed)
    }

    fn convert(
        &mut self,
        from: VerificationType,
        to: VerificationType,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        self.pop_expecting(&from, offset)?;
        self.push(to, cx, offset)
    }

    fn array_load(
        &mut self,
        element: FieldType<String>,
        loaded: VerificationType,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        self.pop_expecting(&VerificationType::Integer, offset)?;
        self.pop_expecting(&VerificationType::array_of(element), offset)?;
        self.push(loaded, cx, offset)
    }

    fn array_store(
        &mut self,
        element: FieldType<String>,
        stored: VerificationType,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        self.pop_expecting(&stored, offset)?;
        self.pop_expecting(&VerificationType::Integer, offset)?;
        self.pop_expecting(&VerificationType::array_of(element), offset)?;
        Ok(())
    }

    fn invoke(
        &mut self,
        invoke_type: InvokeType,
        index: u16,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<(), ConstraintViolation> {
        use VerificationType as V;

        let method = cx
            .pool
            .method_ref(index)
            .ok_or_else(|| self.pool_type(index, "a Methodref", cx, offset))?;
        let method_class = method.class.to_owned();
        let method_name = method.name.to_owned();
        let is_interface = method.is_interface;
        let descriptor = parse_method_descriptor(method.descriptor, index, offset)?;

        if method_name == "<clinit>" {
            return Err(ConstraintViolation::new(
                RuleId::ConstantPoolType,
                offset,
                "<clinit> can never be invoked explicitly",
            ));
        }
        let is_init = method_name == "<init>";
        if is_init && !matches!(invoke_type, InvokeType::Special) {
            return Err(ConstraintViolation::new(
                RuleId::OperandType,
                offset,
                "<init> may only be invoked by invokespecial",
            ));
        }
        if matches!(invoke_type, InvokeType::Interface(_)) != is_interface
            && matches!(invoke_type, InvokeType::Virtual | InvokeType::Interface(_))
        {
            return Err(ConstraintViolation::new(
                RuleId::ConstantPoolType,
                offset,
                format!(
                    "{} does not match the interface flag of the method reference",
                    if is_interface { "invokevirtual" } else { "invokeinterface" }
                ),
            ));
        }

        // Check that all the arguments match, rightmost first
        for expected_argument in descriptor.parameters.iter().rev() {
            let expected = V::from(expected_argument.clone());
            if let Err(violation) = self.pop_expecting(&expected, offset) {
                log::error!(
                    "incompatible argument for {}.{}: {}",
                    method_class,
                    method_name,
                    violation
                );
                return Err(violation);
            }
        }

        if let (InvokeType::Special, true) = (invoke_type, is_init) {
            if descriptor.return_type.is_some() {
                return Err(ConstraintViolation::new(
                    RuleId::ConstantPoolType,
                    offset,
                    "<init> must return void",
                ));
            }

            // Initialize: every alias of the consumed uninitialized value wakes up at once
            match self.pop(offset)? {
                V::UninitializedThis => {
                    let targets_this_or_super = method_class == cx.class_name
                        || Some(method_class.as_str()) == cx.super_name;
                    if !targets_this_or_super {
                        return Err(ConstraintViolation::new(
                            RuleId::UninitializedThis,
                            offset,
                            format!(
                                "constructor must call <init> of {} or its superclass, not {}",
                                cx.class_name, method_class
                            ),
                        ));
                    }
                    self.replace_all(
                        &V::UninitializedThis,
                        V::object(cx.class_name),
                    );
                    self.this_uninitialized = false;
                }
                V::Uninitialized {
                    class,
                    offset: new_offset,
                } => {
                    if class != method_class {
                        return Err(ConstraintViolation::new(
                            RuleId::UninitializedThis,
                            offset,
                            format!("<init> of {} called on an uninitialized {}", method_class, class),
                        ));
                    }
                    let consumed = V::Uninitialized {
                        class: class.clone(),
                        offset: new_offset,
                    };
                    self.replace_all(&consumed, V::object(class));
                }
                other => {
                    return Err(ConstraintViolation::new(
                        RuleId::UninitializedThis,
                        offset,
                        format!("invokespecial <init> on {:?}, which is already initialized", other),
                    ));
                }
            }
        } else {
            let needs_receiver = !matches!(invoke_type, InvokeType::Static);
            if needs_receiver {
                let receiver = self.pop_reference(offset)?;
                if matches!(receiver, V::UninitializedThis | V::Uninitialized { .. }) {
                    return Err(ConstraintViolation::new(
                        RuleId::UninitializedThis,
                        offset,
                        format!("cannot invoke {} on an uninitialized reference", method_name),
                    ));
                }
                let expected_class = class_entry_type(&method_class)
                    .ok_or_else(|| self.pool_type(index, "a Class", cx, offset))?;
                let expected = V::Object(expected_class);
                if !VerificationType::is_assignable(&receiver, &expected) {
                    log::error!(
                        "incompatible receiver for {}.{}: found {:?} but expected {:?}",
                        method_class,
                        method_name,
                        receiver,
                        expected
                    );
                    return Err(ConstraintViolation::new(
                        RuleId::OperandType,
                        offset,
                        format!("found {:?} but expected {:?} as receiver", receiver, expected),
                    ));
                }
            }

            if let Some(return_type) = descriptor.return_type {
                self.push(V::from(return_type), cx, offset)?;
            }
        }

        Ok(())
    }

    /// Resolve a `Fieldref`'s descriptor into a field type
    fn field_type(
        &self,
        index: u16,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<FieldType<String>, ConstraintViolation> {
        let field = cx
            .pool
            .field_ref(index)
            .ok_or_else(|| self.pool_type(index, "a Fieldref", cx, offset))?;
        FieldType::parse(field.descriptor).map_err(|_| {
            ConstraintViolation::new(
                RuleId::ConstantPoolType,
                offset,
                format!("field descriptor '{}' does not parse", field.descriptor),
            )
        })
    }

    /// Resolve a `Class` pool entry into a reference type
    fn class_ref(
        &self,
        index: u16,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> Result<RefType<String>, ConstraintViolation> {
        let name = cx
            .pool
            .class_name(index)
            .ok_or_else(|| self.pool_type(index, "a Class", cx, offset))?;
        class_entry_type(name).ok_or_else(|| {
            ConstraintViolation::new(
                RuleId::ConstantPoolType,
                offset,
                format!("class entry '{}' does not name a usable type", name),
            )
        })
    }

    fn pool_type(
        &self,
        index: u16,
        expected: &str,
        cx: &MethodContext<'_>,
        offset: u32,
    ) -> ConstraintViolation {
        ConstraintViolation::new(
            RuleId::ConstantPoolType,
            offset,
            format!(
                "constant pool index {} is {}, expected {}",
                index,
                cx.pool.describe(index),
                expected
            ),
        )
    }

    fn return_mismatch(
        &self,
        instruction: &str,
        declared: &Option<FieldType<String>>,
        offset: u32,
    ) -> ConstraintViolation {
        use crate::descriptors::RenderDescriptor;

        let declared = match declared {
            None => String::from("void"),
            Some(field_type) => field_type.render(),
        };
        ConstraintViolation::new(
            RuleId::ReturnType,
            offset,
            format!("{} in a method declared to return {}", instruction, declared),
        )
    }
}

fn is_byte_or_boolean_array(value: &VerificationType) -> bool {
    match value {
        VerificationType::Null => true,
        VerificationType::Object(RefType::PrimitiveArray(ArrayType {
            additional_dimensions: 0,
            element_type,
        })) => matches!(element_type, BaseType::Byte | BaseType::Boolean),
        _ => false,
    }
}

fn parse_method_descriptor(
    descriptor: &str,
    index: u16,
    offset: u32,
) -> Result<MethodDescriptor<String>, ConstraintViolation> {
    MethodDescriptor::parse(descriptor).map_err(|_| {
        ConstraintViolation::new(
            RuleId::ConstantPoolType,
            offset,
            format!(
                "method descriptor '{}' at constant pool index {} does not parse",
                descriptor, index
            ),
        )
    })
}
