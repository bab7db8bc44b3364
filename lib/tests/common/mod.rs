//! Byte-level builder for synthesizing minimal class files in tests
//!
//! Each verification scenario is data: a tiny hand-assembled class plus an expected verdict.
//! The builder only knows how to append (no deduplication, no validation), so tests can also
//! produce deliberately broken pools and code arrays.

/// Access flag bits used by the tests
pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;

/// Opcode bytes used by the tests
#[allow(dead_code)]
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const LCONST_0: u8 = 0x09;
    pub const LCONST_1: u8 = 0x0a;
    pub const FCONST_0: u8 = 0x0b;
    pub const DCONST_0: u8 = 0x0e;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ILOAD_1: u8 = 0x1b;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ALOAD_1: u8 = 0x2b;
    pub const ISTORE_0: u8 = 0x3b;
    pub const ISTORE_1: u8 = 0x3c;
    pub const ASTORE_0: u8 = 0x4b;
    pub const DSTORE_0: u8 = 0x47;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const ISUB: u8 = 0x64;
    pub const IFEQ: u8 = 0x99;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const IRETURN: u8 = 0xac;
    pub const DRETURN: u8 = 0xaf;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const NEW: u8 = 0xbb;
    pub const ATHROW: u8 = 0xbf;
    pub const MONITORENTER: u8 = 0xc2;
    pub const MONITOREXIT: u8 = 0xc3;
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// The `Code` attribute contents of one method under construction
pub struct MethodCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,

    /// `(start_pc, end_pc, handler_pc, catch_type_index)`
    pub handlers: Vec<(u16, u16, u16, u16)>,
}

impl MethodCode {
    pub fn new(max_stack: u16, max_locals: u16, bytecode: Vec<u8>) -> MethodCode {
        MethodCode {
            max_stack,
            max_locals,
            bytecode,
            handlers: vec![],
        }
    }

    pub fn handler(mut self, start: u16, end: u16, handler: u16, catch_type: u16) -> MethodCode {
        self.handlers.push((start, end, handler, catch_type));
        self
    }
}

/// Append-only class file assembler
pub struct ClassBuilder {
    pool: Vec<u8>,
    next_index: u16,
    this_class: u16,
    super_class: u16,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassBuilder {
    pub fn new(this_name: &str, super_name: &str) -> ClassBuilder {
        let mut builder = ClassBuilder {
            pool: vec![],
            next_index: 1,
            this_class: 0,
            super_class: 0,
            methods: vec![],
            method_count: 0,
        };
        builder.this_class = builder.class(this_name);
        builder.super_class = builder.class(super_name);
        builder
    }

    fn claim(&mut self, slots: u16) -> u16 {
        let index = self.next_index;
        self.next_index += slots;
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        let index = self.claim(1);
        self.pool.push(1);
        push_u16(&mut self.pool, text.len() as u16);
        self.pool.extend_from_slice(text.as_bytes());
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let index = self.claim(1);
        self.pool.push(7);
        push_u16(&mut self.pool, name_index);
        index
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        let index = self.claim(1);
        self.pool.push(3);
        self.pool.extend_from_slice(&value.to_be_bytes());
        index
    }

    pub fn long_const(&mut self, value: i64) -> u16 {
        let index = self.claim(2);
        self.pool.push(5);
        self.pool.extend_from_slice(&value.to_be_bytes());
        index
    }

    pub fn double_const(&mut self, value: f64) -> u16 {
        let index = self.claim(2);
        self.pool.push(6);
        self.pool.extend_from_slice(&value.to_be_bytes());
        index
    }

    pub fn string_const(&mut self, text: &str) -> u16 {
        let value_index = self.utf8(text);
        let index = self.claim(1);
        self.pool.push(8);
        push_u16(&mut self.pool, value_index);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let index = self.claim(1);
        self.pool.push(12);
        push_u16(&mut self.pool, name_index);
        push_u16(&mut self.pool, descriptor_index);
        index
    }

    pub fn method_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let name_and_type = self.name_and_type(name, descriptor);
        let index = self.claim(1);
        self.pool.push(10);
        push_u16(&mut self.pool, class_index);
        push_u16(&mut self.pool, name_and_type);
        index
    }

    pub fn field_ref(&mut self, class_name: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class_name);
        let name_and_type = self.name_and_type(name, descriptor);
        let index = self.claim(1);
        self.pool.push(9);
        push_u16(&mut self.pool, class_index);
        push_u16(&mut self.pool, name_and_type);
        index
    }

    pub fn method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: MethodCode,
    ) -> &mut ClassBuilder {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let code_attr_name = self.utf8("Code");

        let mut info = vec![];
        push_u16(&mut info, code.max_stack);
        push_u16(&mut info, code.max_locals);
        push_u32(&mut info, code.bytecode.len() as u32);
        info.extend_from_slice(&code.bytecode);
        push_u16(&mut info, code.handlers.len() as u16);
        for (start, end, handler, catch_type) in &code.handlers {
            push_u16(&mut info, *start);
            push_u16(&mut info, *end);
            push_u16(&mut info, *handler);
            push_u16(&mut info, *catch_type);
        }
        push_u16(&mut info, 0); // no nested attributes

        push_u16(&mut self.methods, access_flags);
        push_u16(&mut self.methods, name_index);
        push_u16(&mut self.methods, descriptor_index);
        push_u16(&mut self.methods, 1); // one attribute: Code
        push_u16(&mut self.methods, code_attr_name);
        push_u32(&mut self.methods, info.len() as u32);
        self.methods.extend_from_slice(&info);
        self.method_count += 1;

        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE];
        push_u16(&mut out, 0); // minor
        push_u16(&mut out, 50); // major: Java 6
        push_u16(&mut out, self.next_index);
        out.extend_from_slice(&self.pool);
        push_u16(&mut out, ACC_PUBLIC | ACC_SUPER);
        push_u16(&mut out, self.this_class);
        push_u16(&mut out, self.super_class);
        push_u16(&mut out, 0); // interfaces
        push_u16(&mut out, 0); // fields
        push_u16(&mut out, self.method_count);
        out.extend_from_slice(&self.methods);
        push_u16(&mut out, 0); // class attributes
        out
    }
}

/// The standard one-method test class: `public class Example extends java/lang/Object`
pub fn single_method_class(
    access_flags: u16,
    name: &str,
    descriptor: &str,
    code: MethodCode,
) -> Vec<u8> {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    builder.method(access_flags, name, descriptor, code);
    builder.build()
}
