//! Bytecode verification
//!
//! For any specific instruction inside a method body, the stack and locals must have the same
//! structure regardless of which control flow was used to reach that instruction: although the
//! *values* on the stack and in the locals may differ between executions, the types and order
//! cannot. This per-point information is the frame (represented using [`Frame`]), and the types
//! it tracks (represented using [`VerificationType`]) are slightly augmented from source-level
//! types to take initialization and `null` into account.
//!
//! Verifying straight-line code is simple (see [`Frame::execute`]): each instruction asserts its
//! precondition against the frame and rewrites it. Things get more complicated when an
//! instruction can be reached from multiple locations: the frames arriving from the different
//! sources need to be unified, which turns the whole pass into a fix-point computation that
//! converges toward the right answer if there is one. The interpreter here infers every frame
//! from scratch; `StackMapTable` attributes in the input are ignored rather than trusted.
//!
//! The entry point is [`verify_class`]: parse, then verify each concrete method independently,
//! producing an accept/reject verdict per method with the first failing constraint identified.

mod frame;
mod interpret;
mod rules;
mod types;

pub use frame::{Frame, MethodContext};
pub use rules::{Rule, RuleContext, RuleSet};
pub use types::VerificationType;

use crate::class_file::{ClassFile, Method};
use crate::errors::{ConstraintViolation, MalformedClassError};

/// Knobs for the policy points the JVM specification leaves open
#[derive(Debug, Clone, Default)]
pub struct VerifierOptions {
    /// Enforce structural `monitorenter`/`monitorexit` nesting
    ///
    /// The specification makes structural locking rules optional for verifiers; unbalanced
    /// monitors still raise `IllegalMonitorStateException` at runtime. Off by default.
    pub strict_monitors: bool,
}

impl VerifierOptions {
    pub fn strict_monitors(mut self, strict: bool) -> VerifierOptions {
        self.strict_monitors = strict;
        self
    }
}

/// Verdict for a single method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    Accepted,
    Rejected(ConstraintViolation),
}

impl MethodOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MethodOutcome::Accepted)
    }

    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            MethodOutcome::Accepted => None,
            MethodOutcome::Rejected(violation) => Some(violation),
        }
    }
}

/// One method's verdict, labelled for reporting
#[derive(Debug, Clone)]
pub struct MethodVerdict {
    pub name: String,
    pub descriptor: String,
    pub outcome: MethodOutcome,
}

/// Verdict for a whole class: accepted only if every method is
#[derive(Debug, Clone)]
pub struct ClassVerdict {
    pub class_name: String,
    pub methods: Vec<MethodVerdict>,
}

impl ClassVerdict {
    pub fn is_accepted(&self) -> bool {
        self.methods
            .iter()
            .all(|method| method.outcome.is_accepted())
    }

    /// The first rejected method, in declaration order
    pub fn first_rejection(&self) -> Option<(&MethodVerdict, &ConstraintViolation)> {
        self.methods.iter().find_map(|method| {
            method
                .outcome
                .violation()
                .map(|violation| (method, violation))
        })
    }
}

/// Verify raw class bytes
///
/// Fails with [`MalformedClassError`] only when the input cannot be parsed at all; a class that
/// parses always produces a [`ClassVerdict`], with per-method rejections inside. Verification is
/// a pure function of the input bytes: same bytes, same verdict.
pub fn verify_class(
    bytes: &[u8],
    options: &VerifierOptions,
) -> Result<ClassVerdict, MalformedClassError> {
    let class = ClassFile::parse(bytes)?;
    Ok(verify_parsed_class(&class, options))
}

/// Verify an already-parsed class
pub fn verify_parsed_class(class: &ClassFile, options: &VerifierOptions) -> ClassVerdict {
    let methods = class
        .methods
        .iter()
        .map(|method| {
            let outcome = verify_method(class, method, options);
            match &outcome {
                MethodOutcome::Accepted => log::debug!(
                    "{}.{}{} accepted",
                    class.this_class_name(),
                    method.name,
                    method.descriptor
                ),
                MethodOutcome::Rejected(violation) => log::info!(
                    "{}.{}{} rejected: {}",
                    class.this_class_name(),
                    method.name,
                    method.descriptor,
                    violation
                ),
            }
            MethodVerdict {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                outcome,
            }
        })
        .collect();

    ClassVerdict {
        class_name: class.this_class_name().to_owned(),
        methods,
    }
}

/// Verify a single method; methods without code (abstract, native) are trivially accepted
pub fn verify_method(
    class: &ClassFile,
    method: &Method,
    options: &VerifierOptions,
) -> MethodOutcome {
    let code = match &method.code {
        Some(code) => code,
        None => return MethodOutcome::Accepted,
    };
    match interpret::verify_method_code(class, method, code, options) {
        Ok(()) => MethodOutcome::Accepted,
        Err(violation) => MethodOutcome::Rejected(violation),
    }
}
