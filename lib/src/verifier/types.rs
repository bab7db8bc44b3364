use crate::descriptors::{ArrayType, BaseType, FieldType, RefType};
use crate::util::Width;

pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";
pub const JAVA_LANG_THROWABLE: &str = "java/lang/Throwable";
pub const JAVA_LANG_STRING: &str = "java/lang/String";
pub const JAVA_LANG_CLASS: &str = "java/lang/Class";
pub const JAVA_LANG_CLONEABLE: &str = "java/lang/Cloneable";
pub const JAVA_IO_SERIALIZABLE: &str = "java/io/Serializable";
pub const METHOD_HANDLE: &str = "java/lang/invoke/MethodHandle";
pub const METHOD_TYPE: &str = "java/lang/invoke/MethodType";

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VerificationType {
    /// Unusable slot: an uninitialized local, the second slot of a category-2 value, or the
    /// result of merging incompatible locals. Reading it is the error, not holding it.
    Top,

    Integer,
    Float,
    Long,
    Double,
    Null,

    /// In a constructor, the `this` parameter starts with this type then turns into an object
    /// type once `<init>` is called
    UninitializedThis,

    /// Object (or array) type
    Object(RefType<String>),

    /// State of an object after `new` has run but `<init>` has not, keyed by the offset of the
    /// `new` instruction so two distinct allocations never alias
    Uninitialized { class: String, offset: u32 },

    /// Pushed by `jsr`, consumed through a local by `ret`; tagged with the subroutine entry
    ReturnAddress { subroutine: u32 },
}

impl Width for VerificationType {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl From<FieldType<String>> for VerificationType {
    fn from(field_type: FieldType<String>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl VerificationType {
    /// A plain (non-array) object type
    pub fn object(class_name: impl Into<String>) -> VerificationType {
        VerificationType::Object(RefType::Object(class_name.into()))
    }

    /// An array whose elements have the given field type
    pub fn array_of(element: FieldType<String>) -> VerificationType {
        VerificationType::Object(RefType::array(element))
    }

    /// Is this type a reference type?
    ///
    /// Return addresses are pointers into code, not references into the heap, so they are not.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerificationType::Null
                | VerificationType::UninitializedThis
                | VerificationType::Object(_)
                | VerificationType::Uninitialized { .. }
        )
    }

    /// Check if one verification type can stand in for another
    ///
    /// With no loaded class hierarchy, assignability between two named classes is answered
    /// optimistically: anything assigns to `java/lang/Object`, arrays assign to the interfaces
    /// the spec gives them, and two named object types are assumed compatible. Primitive and
    /// category mismatches are always rejected.
    pub fn is_assignable(sub_type: &Self, super_type: &Self) -> bool {
        use VerificationType::*;

        match (sub_type, super_type) {
            _ if sub_type == super_type => true,
            (Null, Object(_)) => true,
            (Object(_), Object(RefType::Object(name))) if name == JAVA_LANG_OBJECT => true,
            (
                Object(RefType::ObjectArray(_) | RefType::PrimitiveArray(_)),
                Object(RefType::Object(name)),
            ) => name == JAVA_LANG_CLONEABLE || name == JAVA_IO_SERIALIZABLE,
            (Object(RefType::Object(_)), Object(RefType::Object(_))) => true,
            (Object(RefType::ObjectArray(sub)), Object(RefType::ObjectArray(sup))) => {
                sub.additional_dimensions >= sup.additional_dimensions
            }
            // eg. `[[I` can stand in for `[Ljava/lang/Object;`
            (Object(RefType::PrimitiveArray(sub)), Object(RefType::ObjectArray(sup))) => {
                sub.additional_dimensions > sup.additional_dimensions
            }
            _ => false,
        }
    }

    /// Join two stack entries at a control-flow merge point
    ///
    /// The stack's shape must be invariant at a join: a category or reference/primitive conflict
    /// is `None` (a frame-merge conflict), while distinct reference types widen toward
    /// `java/lang/Object`.
    pub fn merge_stack(a: &Self, b: &Self) -> Option<Self> {
        use VerificationType::*;

        if a == b {
            return Some(a.clone());
        }
        match (a, b) {
            (Null, other @ Object(_)) | (other @ Object(_), Null) => Some(other.clone()),
            (Object(_), Object(_)) => Some(VerificationType::object(JAVA_LANG_OBJECT)),
            _ => None,
        }
    }

    /// Join two local slots at a control-flow merge point
    ///
    /// Unlike the stack, a conflicting local is not an immediate error: the slot just becomes
    /// unusable, and only reading it afterwards violates a constraint.
    pub fn merge_local(a: &Self, b: &Self) -> Self {
        VerificationType::merge_stack(a, b).unwrap_or(VerificationType::Top)
    }
}

/// Convert the name found in a `Class` pool entry into a reference type
///
/// Array classes store a descriptor (`[I`, `[Ljava/lang/String;`) where plain classes store a
/// bare binary name.
pub fn class_entry_type(name: &str) -> Option<RefType<String>> {
    use crate::descriptors::ParseDescriptor;

    if name.starts_with('[') {
        RefType::parse(name).ok()
    } else if name.is_empty() {
        None
    } else {
        Some(RefType::Object(name.to_owned()))
    }
}

/// The reference type of an array's elements, one dimension down
pub fn element_type(array: &RefType<String>) -> Option<FieldType<String>> {
    match array {
        RefType::Object(_) => None,
        RefType::ObjectArray(arr) => Some(match arr.additional_dimensions {
            0 => FieldType::object(arr.element_type.clone()),
            n => FieldType::Ref(RefType::ObjectArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: arr.element_type.clone(),
            })),
        }),
        RefType::PrimitiveArray(arr) => Some(match arr.additional_dimensions {
            0 => FieldType::Base(arr.element_type),
            n => FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                additional_dimensions: n - 1,
                element_type: arr.element_type,
            })),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn category_2_values_are_two_slots_wide() {
        assert_eq!(VerificationType::Long.width(), 2);
        assert_eq!(VerificationType::Double.width(), 2);
        assert_eq!(VerificationType::Integer.width(), 1);
        assert_eq!(VerificationType::object(JAVA_LANG_OBJECT).width(), 1);
    }

    #[test]
    fn null_is_assignable_to_any_object() {
        let string = VerificationType::object(JAVA_LANG_STRING);
        assert!(VerificationType::is_assignable(
            &VerificationType::Null,
            &string
        ));
        assert!(!VerificationType::is_assignable(
            &VerificationType::Integer,
            &string
        ));
    }

    #[test]
    fn arrays_assign_to_their_interfaces() {
        let int_array = VerificationType::array_of(FieldType::int());
        for name in [JAVA_LANG_OBJECT, JAVA_LANG_CLONEABLE, JAVA_IO_SERIALIZABLE] {
            assert!(VerificationType::is_assignable(
                &int_array,
                &VerificationType::object(name)
            ));
        }
        assert!(!VerificationType::is_assignable(
            &int_array,
            &VerificationType::object(JAVA_LANG_STRING)
        ));
    }

    #[test]
    fn stack_merge_widens_references_but_rejects_categories() {
        let string = VerificationType::object(JAVA_LANG_STRING);
        let class = VerificationType::object(JAVA_LANG_CLASS);
        assert_eq!(
            VerificationType::merge_stack(&string, &class),
            Some(VerificationType::object(JAVA_LANG_OBJECT))
        );
        assert_eq!(
            VerificationType::merge_stack(&VerificationType::Null, &string),
            Some(string.clone())
        );
        assert_eq!(
            VerificationType::merge_stack(&VerificationType::Integer, &VerificationType::Long),
            None
        );
        assert_eq!(
            VerificationType::merge_stack(&VerificationType::Integer, &string),
            None
        );
    }

    #[test]
    fn local_merge_conflicts_become_unusable() {
        assert_eq!(
            VerificationType::merge_local(&VerificationType::Integer, &VerificationType::Float),
            VerificationType::Top
        );
        assert_eq!(
            VerificationType::merge_local(&VerificationType::Integer, &VerificationType::Integer),
            VerificationType::Integer
        );
    }

    #[test]
    fn class_entry_names() {
        assert_eq!(
            class_entry_type("java/lang/String"),
            Some(RefType::Object(String::from(JAVA_LANG_STRING)))
        );
        let int_matrix = class_entry_type("[[I").expect("array descriptor");
        assert!(int_matrix.is_array());
        assert_eq!(
            element_type(&int_matrix),
            Some(FieldType::array(FieldType::int()))
        );
    }
}
