use crate::access_flags::ClassAccessFlags;
use crate::class_file::{
    read_field, read_method, skip_attributes, ClassReader, ConstantPool, Field, Method,
};
use crate::errors::MalformedClassError;

/// Class file version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    /// JDK 1.0.2, the oldest version the format defines
    pub const JAVA1: Version = Version {
        major: 45,
        minor: 0,
    };

    /// Newest major version accepted by the reader
    pub const MAX_MAJOR: u16 = 65;
}

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl ClassFile {
    /// Magic header bytes at the front of every class file
    const MAGIC: u32 = 0xCAFE_BABE;

    /// Parse raw class bytes
    ///
    /// This is a pure function: it never reads anything but `bytes` and leaves no state behind.
    /// Structural problems (bad magic, truncation, dangling pool indices, descriptor syntax)
    /// surface as [`MalformedClassError`] with the offending byte offset.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, MalformedClassError> {
        let mut reader = ClassReader::new(bytes);

        let magic = reader.read_u32("magic")?;
        if magic != ClassFile::MAGIC {
            return Err(MalformedClassError::new(
                0,
                format!("wrong magic: got {:#010x}, expected 0xCAFEBABE", magic),
            ));
        }

        let minor = reader.read_u16("minor version")?;
        let major = reader.read_u16("major version")?;
        let version = Version { major, minor };
        if major < Version::JAVA1.major || major > Version::MAX_MAJOR {
            return Err(reader.error(format!("unsupported class file version {}.{}", major, minor)));
        }

        let constants = ConstantPool::read(&mut reader)?;

        let access_flags = ClassAccessFlags::from_u16(reader.read_u16("class access flags")?);

        let this_class = reader.read_u16("this class index")?;
        if constants.class_name(this_class).is_none() {
            return Err(reader.error(format!(
                "this_class index {} is {}, expected Class",
                this_class,
                constants.describe(this_class)
            )));
        }

        let super_class = reader.read_u16("super class index")?;
        if super_class == 0 {
            // Only java/lang/Object has no superclass
            if constants.class_name(this_class) != Some("java/lang/Object") {
                return Err(reader.error("only java/lang/Object may have super_class 0"));
            }
        } else if constants.class_name(super_class).is_none() {
            return Err(reader.error(format!(
                "super_class index {} is {}, expected Class",
                super_class,
                constants.describe(super_class)
            )));
        }

        let interface_count = reader.read_u16("interface count")?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let interface = reader.read_u16("interface index")?;
            if constants.class_name(interface).is_none() {
                return Err(reader.error(format!(
                    "interface index {} is {}, expected Class",
                    interface,
                    constants.describe(interface)
                )));
            }
            interfaces.push(interface);
        }

        let field_count = reader.read_u16("field count")?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(read_field(&mut reader, &constants)?);
        }

        let method_count = reader.read_u16("method count")?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(read_method(&mut reader, &constants)?);
        }

        skip_attributes(&mut reader, &constants)?;

        if !reader.at_end() {
            return Err(reader.error("trailing bytes after class file"));
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
        })
    }

    /// Binary name of this class (validated during parsing)
    pub fn this_class_name(&self) -> &str {
        self.constants.class_name(self.this_class).unwrap_or("")
    }

    /// Binary name of the superclass; `None` for java/lang/Object
    pub fn super_class_name(&self) -> Option<&str> {
        if self.super_class == 0 {
            None
        } else {
            self.constants.class_name(self.super_class)
        }
    }
}
