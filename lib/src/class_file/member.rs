use crate::access_flags::{FieldAccessFlags, MethodAccessFlags};
use crate::class_file::{ClassReader, ConstantPool};
use crate::descriptors::{FieldType, MethodDescriptor, ParseDescriptor};
use crate::errors::MalformedClassError;

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
}

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// `None` for `abstract` and `native` methods
    pub code: Option<Code>,
}

impl Method {
    pub fn is_abstract_or_native(&self) -> bool {
        self.access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
    }
}

/// Contents of a method's `Code` attribute
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
}

/// One entry of a `Code` attribute's exception table
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,

    /// End of the protected range (exclusive)
    pub end_pc: u16,

    /// First instruction of the handler
    pub handler_pc: u16,

    /// `Class` pool index of the caught type; 0 catches everything
    pub catch_type: u16,
}

/// Skips the `attributes_count` and `attributes` items of a struct we don't model further
pub(crate) fn skip_attributes(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<(), MalformedClassError> {
    let count = reader.read_u16("attribute count")?;
    for _ in 0..count {
        let name_index = reader.read_u16("attribute name index")?;
        if pool.utf8(name_index).is_none() {
            return Err(reader.error(format!(
                "attribute name index {} is {}, expected Utf8",
                name_index,
                pool.describe(name_index)
            )));
        }
        let length = reader.read_u32("attribute length")? as usize;
        reader.skip(length, "attribute data")?;
    }
    Ok(())
}

pub(crate) fn read_field(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<Field, MalformedClassError> {
    let access_flags = FieldAccessFlags::from_u16(reader.read_u16("field access flags")?);

    let name_index = reader.read_u16("field name index")?;
    let name = pool
        .utf8(name_index)
        .ok_or_else(|| reader.error(format!("field name index {} is not Utf8", name_index)))?
        .to_owned();

    let descriptor_index = reader.read_u16("field descriptor index")?;
    let descriptor = pool
        .utf8(descriptor_index)
        .ok_or_else(|| {
            reader.error(format!(
                "field descriptor index {} is not Utf8",
                descriptor_index
            ))
        })?
        .to_owned();
    if FieldType::<String>::parse(&descriptor).is_err() {
        return Err(reader.error(format!(
            "invalid descriptor '{}' for field '{}'",
            descriptor, name
        )));
    }

    skip_attributes(reader, pool)?;

    Ok(Field {
        access_flags,
        name,
        descriptor,
    })
}

pub(crate) fn read_method(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
) -> Result<Method, MalformedClassError> {
    let access_flags = MethodAccessFlags::from_u16(reader.read_u16("method access flags")?);

    let name_index = reader.read_u16("method name index")?;
    let name = pool
        .utf8(name_index)
        .ok_or_else(|| reader.error(format!("method name index {} is not Utf8", name_index)))?
        .to_owned();

    let descriptor_index = reader.read_u16("method descriptor index")?;
    let descriptor = pool
        .utf8(descriptor_index)
        .ok_or_else(|| {
            reader.error(format!(
                "method descriptor index {} is not Utf8",
                descriptor_index
            ))
        })?
        .to_owned();
    if MethodDescriptor::<String>::parse(&descriptor).is_err() {
        return Err(reader.error(format!(
            "invalid descriptor '{}' for method '{}'",
            descriptor, name
        )));
    }

    let mut code: Option<Code> = None;
    let attribute_count = reader.read_u16("method attribute count")?;
    for _ in 0..attribute_count {
        let attr_name_index = reader.read_u16("attribute name index")?;
        let attr_name = pool.utf8(attr_name_index).ok_or_else(|| {
            reader.error(format!(
                "attribute name index {} is {}, expected Utf8",
                attr_name_index,
                pool.describe(attr_name_index)
            ))
        })?;
        let length = reader.read_u32("attribute length")? as usize;

        if attr_name == "Code" {
            if code.is_some() {
                return Err(reader.error(format!("duplicate Code attribute on '{}'", name)));
            }
            let attr_start = reader.offset();
            code = Some(read_code(reader, pool, &name)?);
            if reader.offset() - attr_start != length {
                return Err(reader.error(format!(
                    "Code attribute of '{}' declares {} bytes but holds {}",
                    name,
                    length,
                    reader.offset() - attr_start
                )));
            }
        } else {
            log::debug!("skipping attribute '{}' on method '{}'", attr_name, name);
            reader.skip(length, "attribute data")?;
        }
    }

    let method = Method {
        access_flags,
        name,
        descriptor,
        code,
    };

    // The format ties the presence of `Code` to the method kind
    if method.is_abstract_or_native() && method.code.is_some() {
        return Err(reader.error(format!(
            "abstract or native method '{}' has a Code attribute",
            method.name
        )));
    }
    if !method.is_abstract_or_native() && method.code.is_none() {
        return Err(reader.error(format!(
            "concrete method '{}' has no Code attribute",
            method.name
        )));
    }

    Ok(method)
}

fn read_code(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool,
    method_name: &str,
) -> Result<Code, MalformedClassError> {
    let max_stack = reader.read_u16("max_stack")?;
    let max_locals = reader.read_u16("max_locals")?;

    let code_length = reader.read_u32("code length")? as usize;
    if code_length == 0 {
        return Err(reader.error(format!("empty code array in '{}'", method_name)));
    }
    let bytecode = reader.read_bytes(code_length, "code array")?.to_vec();

    let handler_count = reader.read_u16("exception table length")?;
    let mut exception_table = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        let handler = ExceptionHandler {
            start_pc: reader.read_u16("exception start_pc")?,
            end_pc: reader.read_u16("exception end_pc")?,
            handler_pc: reader.read_u16("exception handler_pc")?,
            catch_type: reader.read_u16("exception catch_type")?,
        };
        if handler.catch_type != 0 && pool.class_name(handler.catch_type).is_none() {
            return Err(reader.error(format!(
                "exception catch type index {} is {}, expected Class",
                handler.catch_type,
                pool.describe(handler.catch_type)
            )));
        }
        exception_table.push(handler);
    }

    // The code attribute can itself carry attributes (StackMapTable, LineNumberTable, ...); the
    // verifier infers frames from scratch, so all of them are skipped.
    skip_attributes(reader, pool)?;

    Ok(Code {
        max_stack,
        max_locals,
        bytecode,
        exception_table,
    })
}
