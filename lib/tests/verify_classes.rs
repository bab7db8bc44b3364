//! End-to-end verification scenarios, one synthesized class file per case
//!
//! Each case is a tiny class with one interesting method and an expected accept/reject verdict,
//! so the checker logic stays decoupled from the fixture data.

mod common;

use common::{op, single_method_class, ClassBuilder, MethodCode, ACC_PUBLIC, ACC_STATIC};
use jverify::{verify_class, ClassVerdict, ConstraintViolation, RuleId, VerifierOptions};

fn verify(bytes: &[u8]) -> ClassVerdict {
    verify_class(bytes, &VerifierOptions::default()).expect("class must parse")
}

fn first_violation(verdict: &ClassVerdict) -> &ConstraintViolation {
    let (_, violation) = verdict.first_rejection().expect("a method must be rejected");
    violation
}

#[test]
fn straight_line_subtraction_is_accepted() {
    // return 1234 - 1234
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        MethodCode::new(
            2,
            0,
            vec![
                op::SIPUSH,
                0x04,
                0xd2,
                op::SIPUSH,
                0x04,
                0xd2,
                op::ISUB,
                op::IRETURN,
            ],
        ),
    );
    assert!(verify(&bytes).is_accepted());
}

#[test]
fn reserved_opcodes_are_rejected() {
    for opcode in [0xcau8, 0xf0, 0xfe, 0xff] {
        let bytes = single_method_class(
            ACC_PUBLIC | ACC_STATIC,
            "run",
            "()V",
            MethodCode::new(0, 0, vec![opcode, op::RETURN]),
        );
        let verdict = verify(&bytes);
        let violation = first_violation(&verdict);
        assert_eq!(violation.rule, RuleId::IllegalOpcode, "opcode {:#04x}", opcode);
        assert_eq!(violation.offset, 0);
    }
}

#[test]
fn back_to_back_category_2_pushes_overflow_the_stack() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(2, 0, vec![op::LCONST_0, op::LCONST_1, op::RETURN]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::StackBounds);
    assert_eq!(violation.offset, 1);
}

#[test]
fn iload_from_a_double_slot_is_rejected() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(D)V",
        MethodCode::new(1, 2, vec![op::ILOAD_0, op::POP, op::RETURN]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::LocalSlotType);
    assert_eq!(violation.offset, 0);
}

#[test]
fn dstore_exceeding_max_locals_is_rejected_at_its_offset() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(2, 1, vec![op::DCONST_0, op::DSTORE_0, op::RETURN]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::LocalSlotType);
    assert_eq!(violation.offset, 1);
}

#[test]
fn constructor_without_super_init_is_rejected() {
    let bytes = single_method_class(
        ACC_PUBLIC,
        "<init>",
        "()V",
        MethodCode::new(0, 1, vec![op::RETURN]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::UninitializedThis);
}

#[test]
fn constructor_calling_super_init_is_accepted() {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let init = builder.method_ref("java/lang/Object", "<init>", "()V");
    builder.method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        MethodCode::new(
            1,
            1,
            vec![
                op::ALOAD_0,
                op::INVOKESPECIAL,
                (init >> 8) as u8,
                init as u8,
                op::RETURN,
            ],
        ),
    );
    assert!(verify(&builder.build()).is_accepted());
}

#[test]
fn constructor_skipping_init_on_one_path_is_rejected() {
    // if (arg == 0) goto the return, skipping super.<init>
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let init = builder.method_ref("java/lang/Object", "<init>", "()V");
    builder.method(
        ACC_PUBLIC,
        "<init>",
        "(I)V",
        MethodCode::new(
            1,
            2,
            vec![
                op::ILOAD_1,       // 0
                op::IFEQ,          // 1 -> 8
                0x00,
                0x07,
                op::ALOAD_0,       // 4
                op::INVOKESPECIAL, // 5
                (init >> 8) as u8,
                init as u8,
                op::RETURN,        // 8
            ],
        ),
    );
    let verdict = verify(&builder.build());
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::UninitializedThis);
    assert_eq!(violation.offset, 8);
}

#[test]
fn branch_into_instruction_operands_is_rejected() {
    // goto at 2 targets offset 1, the middle of the bipush
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(1, 0, vec![op::BIPUSH, 0x07, op::GOTO, 0xff, 0xff]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::IllegalBranchTarget);
    assert_eq!(violation.offset, 2);
}

#[test]
fn incompatible_stack_types_at_a_join_are_rejected() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(I)V",
        MethodCode::new(
            1,
            1,
            vec![
                op::ILOAD_0,  // 0
                op::IFEQ,     // 1 -> 8
                0x00,
                0x07,
                op::ICONST_0, // 4
                op::GOTO,     // 5 -> 9
                0x00,
                0x04,
                op::FCONST_0, // 8
                op::POP,      // 9: Integer meets Float here
                op::RETURN,   // 10
            ],
        ),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::FrameMergeConflict);
    assert_eq!(violation.offset, 9);
}

#[test]
fn monitor_nesting_is_a_strictness_knob() {
    let unbalanced = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(Ljava/lang/Object;)V",
        MethodCode::new(1, 1, vec![op::ALOAD_0, op::MONITOREXIT, op::RETURN]),
    );

    // The default follows the runtime-checks-only reading of the spec
    assert!(verify(&unbalanced).is_accepted());

    let strict = VerifierOptions::default().strict_monitors(true);
    let verdict = verify_class(&unbalanced, &strict).expect("class must parse");
    let (_, violation) = verdict.first_rejection().expect("rejected under strict");
    assert_eq!(violation.rule, RuleId::MonitorBalance);
    assert_eq!(violation.offset, 1);

    let balanced = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(Ljava/lang/Object;)V",
        MethodCode::new(
            2,
            1,
            vec![
                op::ALOAD_0,
                op::DUP,
                op::MONITORENTER,
                op::MONITOREXIT,
                op::RETURN,
            ],
        ),
    );
    let verdict = verify_class(&balanced, &strict).expect("class must parse");
    assert!(verdict.is_accepted());
}

#[test]
fn jsr_and_ret_round_trip_is_accepted() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(
            1,
            1,
            vec![
                op::JSR, // 0 -> 4
                0x00,
                0x04,
                op::RETURN,   // 3
                op::ASTORE_0, // 4
                op::RET,      // 5
                0x00,
            ],
        ),
    );
    assert!(verify(&bytes).is_accepted());
}

#[test]
fn reentering_an_active_subroutine_is_rejected() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(
            2,
            1,
            vec![
                op::JSR, // 0 -> 4
                0x00,
                0x04,
                op::RETURN,   // 3
                op::ASTORE_0, // 4
                op::JSR,      // 5 -> 4 again, while still inside it
                0xff,
                0xff,
            ],
        ),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::Subroutine);
    assert_eq!(violation.offset, 5);
}

#[test]
fn exception_handler_starts_with_the_thrown_reference() {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let caught = builder.class("java/lang/Exception");
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        MethodCode::new(
            1,
            0,
            vec![
                op::ICONST_0, // 0: protected
                op::IRETURN,  // 1
                op::POP,      // 2: handler entry, stack is [Exception]
                op::ICONST_1, // 3
                op::IRETURN,  // 4
            ],
        )
        .handler(0, 1, 2, caught),
    );
    assert!(verify(&builder.build()).is_accepted());
}

#[test]
fn athrow_accepts_an_exception_reference() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "(Ljava/lang/Exception;)V",
        MethodCode::new(1, 1, vec![op::ALOAD_0, op::ATHROW]),
    );
    assert!(verify(&bytes).is_accepted());
}

#[test]
fn falling_off_the_end_is_rejected() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(0, 0, vec![op::NOP]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::ReturnType);
    assert_eq!(violation.offset, 0);
}

#[test]
fn return_must_match_the_descriptor() {
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        MethodCode::new(0, 0, vec![op::RETURN]),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::ReturnType);
}

#[test]
fn invokes_and_field_access_type_check() {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let length = builder.method_ref("java/lang/String", "length", "()I");
    let counter = builder.field_ref("Example", "counter", "I");
    builder
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "strLen",
            "(Ljava/lang/String;)I",
            MethodCode::new(
                1,
                1,
                vec![
                    op::ALOAD_0,
                    op::INVOKEVIRTUAL,
                    (length >> 8) as u8,
                    length as u8,
                    op::IRETURN,
                ],
            ),
        )
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "readCounter",
            "()I",
            MethodCode::new(
                1,
                0,
                vec![
                    op::GETSTATIC,
                    (counter >> 8) as u8,
                    counter as u8,
                    op::IRETURN,
                ],
            ),
        )
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "writeCounter",
            "(I)V",
            MethodCode::new(
                1,
                1,
                vec![
                    op::ILOAD_0,
                    op::PUTSTATIC,
                    (counter >> 8) as u8,
                    counter as u8,
                    op::RETURN,
                ],
            ),
        );
    let verdict = verify(&builder.build());
    assert!(verdict.is_accepted(), "verdict: {:?}", verdict.first_rejection());
}

#[test]
fn new_dup_init_produces_an_initialized_object() {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let object = builder.class("java/lang/Object");
    let init = builder.method_ref("java/lang/Object", "<init>", "()V");
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "make",
        "()Ljava/lang/Object;",
        MethodCode::new(
            2,
            0,
            vec![
                op::NEW,
                (object >> 8) as u8,
                object as u8,
                op::DUP,
                op::INVOKESPECIAL,
                (init >> 8) as u8,
                init as u8,
                op::ARETURN,
            ],
        ),
    );
    assert!(verify(&builder.build()).is_accepted());
}

#[test]
fn ldc_checks_the_constant_category() {
    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let int_index = builder.int_const(42);
    let string_index = builder.string_const("hello");
    let double_index = builder.double_const(2.5);
    builder
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "fortyTwo",
            "()I",
            MethodCode::new(1, 0, vec![op::LDC, int_index as u8, op::IRETURN]),
        )
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "greeting",
            "()Ljava/lang/String;",
            MethodCode::new(1, 0, vec![op::LDC, string_index as u8, op::ARETURN]),
        )
        .method(
            ACC_PUBLIC | ACC_STATIC,
            "twoAndAHalf",
            "()D",
            MethodCode::new(
                2,
                0,
                vec![
                    op::LDC2_W,
                    (double_index >> 8) as u8,
                    double_index as u8,
                    op::DRETURN,
                ],
            ),
        );
    assert!(verify(&builder.build()).is_accepted());

    let mut builder = ClassBuilder::new("Example", "java/lang/Object");
    let long_index = builder.long_const(42);
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "bad",
        "()V",
        MethodCode::new(2, 0, vec![op::LDC, long_index as u8, op::RETURN]),
    );
    let verdict = verify(&builder.build());
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::ConstantPoolType);
    assert_eq!(violation.offset, 0);
}

#[test]
fn oversized_code_arrays_are_rejected() {
    let mut bytecode = vec![op::NOP; 65535];
    bytecode.push(op::RETURN);
    let bytes = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(0, 0, bytecode),
    );
    let verdict = verify(&bytes);
    let violation = first_violation(&verdict);
    assert_eq!(violation.rule, RuleId::CodeTooLarge);
}

#[test]
fn verdicts_are_deterministic() {
    let accepted = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        MethodCode::new(1, 0, vec![op::ICONST_0, op::IRETURN]),
    );
    let first = verify(&accepted);
    let second = verify(&accepted);
    assert!(first.is_accepted());
    assert!(second.is_accepted());

    let rejected = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()V",
        MethodCode::new(2, 1, vec![op::DCONST_0, op::DSTORE_0, op::RETURN]),
    );
    let first = verify(&rejected);
    let second = verify(&rejected);
    assert_eq!(
        first_violation(&first),
        first_violation(&second),
        "same bytes must produce the same diagnostic"
    );
}

#[test]
fn unreadable_input_is_a_parse_error_not_a_panic() {
    let options = VerifierOptions::default();
    assert!(verify_class(&[], &options).is_err());
    assert!(verify_class(&[0xca, 0xfe], &options).is_err());
    assert!(verify_class(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07], &options).is_err());

    // Truncated right after a valid header
    let valid = single_method_class(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        MethodCode::new(1, 0, vec![op::ICONST_0, op::IRETURN]),
    );
    for cut in [10, 20, valid.len() - 1] {
        assert!(
            verify_class(&valid[..cut], &options).is_err(),
            "prefix of {} bytes must be malformed",
            cut
        );
    }
}
