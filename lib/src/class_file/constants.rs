use crate::class_file::ClassReader;
use crate::errors::MalformedClassError;

/// Constants as in the constant pool
///
/// Cross-references between entries are stored as raw `u16` pool indices; [`ConstantPool`]
/// validates them once after reading, and the typed getters re-check tags on every lookup so the
/// verifier can turn a bad instruction operand into a violation instead of a panic.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Class or an interface
    Class(u16),

    /// Constant object of type `java.lang.String`
    String(u16),

    /// Field
    FieldRef {
        class: u16,
        name_and_type: u16,
    },

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: u16,
        name_and_type: u16,
        is_interface: bool,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: u16,
        descriptor: u16,
    },

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: u8,
        member: u16,
    },

    /// Method type
    MethodType {
        descriptor: u16,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        bootstrap_method: u16,
        name_and_type: u16,
    },
}

impl Constant {
    fn tag_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class(_) => "Class",
            Constant::String(_) => "String",
            Constant::FieldRef { .. } => "Fieldref",
            Constant::MethodRef { .. } => "Methodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
        }
    }
}

/// What kind of value an `ldc`/`ldc_w`/`ldc2_w` operand loads
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadableConstant {
    Integer,
    Float,
    Long,
    Double,
    String,
    Class,
    MethodHandle,
    MethodType,
}

#[derive(Debug, Clone)]
enum Slot {
    Entry(Constant),

    /// The slot after a `Long` or `Double` entry. Quoting the spec:
    ///
    /// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
    Unusable,
}

/// A field reference resolved down to names
#[derive(Debug, Copy, Clone)]
pub struct FieldRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// A method reference resolved down to names
#[derive(Debug, Copy, Clone)]
pub struct MethodRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
}

/// Class file constant pool
///
/// Indexing starts at 1 and `Long`/`Double` entries occupy two consecutive slots.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    slots: Vec<Slot>,
}

impl ConstantPool {
    /// Read `constant_pool_count` and all entries
    pub(crate) fn read(reader: &mut ClassReader<'_>) -> Result<ConstantPool, MalformedClassError> {
        let count = reader.read_u16("constant pool count")?;
        let mut slots = vec![Slot::Unusable]; // index 0 is never usable

        let mut index: u16 = 1;
        while index < count {
            let entry_offset = reader.offset();
            let tag = reader.read_u8("constant tag")?;
            let constant = match tag {
                1 => {
                    let length = reader.read_u16("Utf8 length")? as usize;
                    let raw = reader.read_bytes(length, "Utf8 bytes")?;
                    let decoded = decode_modified_utf8(raw).map_err(|message| {
                        MalformedClassError::new(entry_offset, message)
                    })?;
                    Constant::Utf8(decoded)
                }
                3 => Constant::Integer(reader.read_i32("Integer constant")?),
                4 => Constant::Float(reader.read_f32("Float constant")?),
                5 => Constant::Long(reader.read_i64("Long constant")?),
                6 => Constant::Double(reader.read_f64("Double constant")?),
                7 => Constant::Class(reader.read_u16("Class name index")?),
                8 => Constant::String(reader.read_u16("String value index")?),
                9 => Constant::FieldRef {
                    class: reader.read_u16("Fieldref class index")?,
                    name_and_type: reader.read_u16("Fieldref name and type index")?,
                },
                10 | 11 => Constant::MethodRef {
                    class: reader.read_u16("Methodref class index")?,
                    name_and_type: reader.read_u16("Methodref name and type index")?,
                    is_interface: tag == 11,
                },
                12 => Constant::NameAndType {
                    name: reader.read_u16("NameAndType name index")?,
                    descriptor: reader.read_u16("NameAndType descriptor index")?,
                },
                15 => Constant::MethodHandle {
                    handle_kind: reader.read_u8("MethodHandle kind")?,
                    member: reader.read_u16("MethodHandle member index")?,
                },
                16 => Constant::MethodType {
                    descriptor: reader.read_u16("MethodType descriptor index")?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_method: reader.read_u16("InvokeDynamic bootstrap index")?,
                    name_and_type: reader.read_u16("InvokeDynamic name and type index")?,
                },
                other => {
                    return Err(MalformedClassError::new(
                        entry_offset,
                        format!("unknown constant pool tag {}", other),
                    ))
                }
            };

            let takes_two_slots = matches!(constant, Constant::Long(_) | Constant::Double(_));
            slots.push(Slot::Entry(constant));
            if takes_two_slots {
                slots.push(Slot::Unusable);
                index = index.checked_add(2).ok_or_else(|| {
                    MalformedClassError::new(entry_offset, "constant pool index overflow")
                })?;
            } else {
                index += 1;
            }
        }

        if index != count {
            return Err(MalformedClassError::new(
                reader.offset(),
                "wide constant overruns the constant pool",
            ));
        }

        let pool = ConstantPool { slots };
        pool.validate(reader.offset())?;
        Ok(pool)
    }

    /// Check that every cross-reference between entries lands on an entry of the expected tag
    fn validate(&self, file_offset: usize) -> Result<(), MalformedClassError> {
        let dangling = |index: u16, expected: &str| {
            MalformedClassError::new(
                file_offset,
                format!(
                    "constant pool index {} does not resolve to a {} entry",
                    index, expected
                ),
            )
        };

        for slot in &self.slots {
            let constant = match slot {
                Slot::Entry(constant) => constant,
                Slot::Unusable => continue,
            };
            match *constant {
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => (),
                Constant::Class(name) => {
                    let name = self.utf8(name).ok_or_else(|| dangling(name, "Utf8"))?;
                    if name.is_empty() {
                        return Err(MalformedClassError::new(file_offset, "empty class name"));
                    }
                }
                Constant::String(value) => {
                    self.utf8(value).ok_or_else(|| dangling(value, "Utf8"))?;
                }
                Constant::FieldRef {
                    class,
                    name_and_type,
                }
                | Constant::MethodRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    if !matches!(self.get(class), Some(Constant::Class(_))) {
                        return Err(dangling(class, "Class"));
                    }
                    if !matches!(self.get(name_and_type), Some(Constant::NameAndType { .. })) {
                        return Err(dangling(name_and_type, "NameAndType"));
                    }
                }
                Constant::NameAndType { name, descriptor } => {
                    self.utf8(name).ok_or_else(|| dangling(name, "Utf8"))?;
                    self.utf8(descriptor)
                        .ok_or_else(|| dangling(descriptor, "Utf8"))?;
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => {
                    if !(1..=9).contains(&handle_kind) {
                        return Err(MalformedClassError::new(
                            file_offset,
                            format!("invalid method handle kind {}", handle_kind),
                        ));
                    }
                    let member_ok = match handle_kind {
                        1..=4 => matches!(self.get(member), Some(Constant::FieldRef { .. })),
                        _ => matches!(self.get(member), Some(Constant::MethodRef { .. })),
                    };
                    if !member_ok {
                        return Err(dangling(member, "Fieldref or Methodref"));
                    }
                }
                Constant::MethodType { descriptor } => {
                    self.utf8(descriptor)
                        .ok_or_else(|| dangling(descriptor, "Utf8"))?;
                }
                Constant::InvokeDynamic { name_and_type, .. } => {
                    if !matches!(self.get(name_and_type), Some(Constant::NameAndType { .. })) {
                        return Err(dangling(name_and_type, "NameAndType"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of slots, including the unusable index 0
    pub fn slot_count(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Look up an entry; `None` for out-of-range indices and unusable slots
    pub fn get(&self, index: u16) -> Option<&Constant> {
        match self.slots.get(index as usize) {
            Some(Slot::Entry(constant)) => Some(constant),
            _ => None,
        }
    }

    /// Describe what an index holds, for diagnostics
    pub fn describe(&self, index: u16) -> &'static str {
        match self.slots.get(index as usize) {
            Some(Slot::Entry(constant)) => constant.tag_name(),
            Some(Slot::Unusable) => "an unusable slot",
            None => "nothing (out of range)",
        }
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(string) => Some(string),
            _ => None,
        }
    }

    /// Binary name of the class behind a `Class` entry
    ///
    /// Note: for array classes the "name" is a field descriptor like `[I`.
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => None,
        }
    }

    pub fn name_and_type(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Some((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => None,
        }
    }

    pub fn field_ref(&self, index: u16) -> Option<FieldRef<'_>> {
        match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(FieldRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            _ => None,
        }
    }

    pub fn method_ref(&self, index: u16) -> Option<MethodRef<'_>> {
        match self.get(index)? {
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Some(MethodRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                    is_interface: *is_interface,
                })
            }
            _ => None,
        }
    }

    /// Name and descriptor behind an `InvokeDynamic` entry
    pub fn invoke_dynamic(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            Constant::InvokeDynamic { name_and_type, .. } => self.name_and_type(*name_and_type),
            _ => None,
        }
    }

    /// Classify an index as an `ldc`-family operand
    pub fn loadable(&self, index: u16) -> Option<LoadableConstant> {
        Some(match self.get(index)? {
            Constant::Integer(_) => LoadableConstant::Integer,
            Constant::Float(_) => LoadableConstant::Float,
            Constant::Long(_) => LoadableConstant::Long,
            Constant::Double(_) => LoadableConstant::Double,
            Constant::String(_) => LoadableConstant::String,
            Constant::Class(_) => LoadableConstant::Class,
            Constant::MethodHandle { .. } => LoadableConstant::MethodHandle,
            Constant::MethodType { .. } => LoadableConstant::MethodType,
            _ => return None,
        })
    }
}

/// Decode the modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u{0000}` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    fn continuation(bytes: &[u8], at: usize) -> Result<u32, String> {
        match bytes.get(at) {
            Some(b) if b & 0b1100_0000 == 0b1000_0000 => Ok(u32::from(b & 0x3F)),
            _ => Err(format!("invalid UTF-8 continuation at byte {}", at)),
        }
    }

    let mut decoded = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let code: u32 = if b == 0 || b >= 0xF0 {
            return Err(format!("invalid UTF-8 byte {:#04x} at {}", b, i));
        } else if b < 0x80 {
            i += 1;
            u32::from(b)
        } else if b & 0b1110_0000 == 0b1100_0000 {
            let low = continuation(bytes, i + 1)?;
            i += 2;
            (u32::from(b & 0x1F) << 6) | low
        } else if b & 0b1111_0000 == 0b1110_0000 {
            let mid = continuation(bytes, i + 1)?;
            let low = continuation(bytes, i + 2)?;
            i += 3;
            (u32::from(b & 0x0F) << 12) | (mid << 6) | low
        } else {
            return Err(format!("invalid UTF-8 byte {:#04x} at {}", b, i));
        };

        match code {
            // High surrogate: must pair with a following 3-byte low surrogate
            0xD800..=0xDBFF => {
                let b1 = bytes.get(i).copied().unwrap_or(0);
                if b1 & 0b1111_0000 != 0b1110_0000 {
                    return Err(format!("unpaired surrogate at byte {}", i));
                }
                let mid = continuation(bytes, i + 1)?;
                let low = continuation(bytes, i + 2)?;
                let second = (u32::from(b1 & 0x0F) << 12) | (mid << 6) | low;
                if !(0xDC00..=0xDFFF).contains(&second) {
                    return Err(format!("unpaired surrogate at byte {}", i));
                }
                i += 3;
                let combined = 0x10000 + ((code - 0xD800) << 10) + (second - 0xDC00);
                match char::from_u32(combined) {
                    Some(c) => decoded.push(c),
                    None => return Err(format!("invalid code point {:#x}", combined)),
                }
            }
            0xDC00..=0xDFFF => {
                return Err(format!("unpaired surrogate at byte {}", i));
            }
            _ => match char::from_u32(code) {
                Some(c) => decoded.push(c),
                None => return Err(format!("invalid code point {:#x}", code)),
            },
        }
    }
    Ok(decoded)
}


#[cfg(test)]
mod decode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).unwrap(),
            "a\x00a"
        );
        // Raw null bytes never appear in the encoded form
        assert!(decode_modified_utf8(&[97, 0, 97]).is_err());
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(decode_modified_utf8(&[102, 111, 111]).unwrap(), "foo");
        assert_eq!(
            decode_modified_utf8(&[104, 101, 108, 49, 48, 95, 87, 111, 114, 108, 100]).unwrap(),
            "hel10_World"
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            decode_modified_utf8(&[
                196, 132, 199, 141, 199, 158, 199, 160, 199, 186, 200, 128, 200, 130, 200, 166,
                200, 186, 211, 144, 211, 146
            ])
            .unwrap(),
            "ĄǍǞǠǺȀȂȦȺӐӒ"
        );
        assert_eq!(
            decode_modified_utf8(&[
                224, 164, 132, 224, 164, 133, 224, 165, 178, 224, 166, 133, 224, 168, 133, 224,
                170, 133, 224, 172, 133, 224, 174, 133, 224, 176, 133, 224, 178, 133, 224, 180,
                133, 224, 184, 176, 224, 186, 176, 224, 188, 129, 224, 189, 168
            ])
            .unwrap(),
            "ऄअॲঅਅઅଅஅఅಅഅะະ༁ཨ"
        );
    }

    #[test]
    fn supplementary_characters() {
        assert_eq!(
            decode_modified_utf8(&[
                237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237,
                191, 191
            ])
            .unwrap(),
            "\u{10000}\u{dffff}\u{10FFFF}"
        );
    }

    #[test]
    fn truncated_and_unpaired_input() {
        assert!(decode_modified_utf8(&[0b1100_0001]).is_err());
        assert!(decode_modified_utf8(&[224, 164]).is_err());
        // Lone high surrogate
        assert!(decode_modified_utf8(&[237, 160, 128]).is_err());
        // Lone low surrogate
        assert!(decode_modified_utf8(&[237, 176, 128]).is_err());
    }
}
