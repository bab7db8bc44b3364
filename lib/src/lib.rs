//! Static verifier for JVM class files
//!
//! Given the raw bytes of a `.class` file, decide whether each method's bytecode can execute
//! safely, before any of it runs. The pipeline is the classic one: parse the class-file format,
//! decode each method's code array, split it into basic blocks, then run an iterative data-flow
//! pass that pushes abstract (stack, locals) frames through every reachable instruction until
//! nothing changes. A method is rejected with the first constraint it breaks (stack bounds,
//! local slot typing, branch legality, initialization discipline, ...), identified by rule id,
//! byte offset, and message.
//!
//! ### Simple example
//!
//! ```no_run
//! use jverify::{verify_class, VerifierOptions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("Example.class")?;
//! let verdict = verify_class(&bytes, &VerifierOptions::default())?;
//!
//! match verdict.first_rejection() {
//!     None => println!("{}: all methods verify", verdict.class_name),
//!     Some((method, violation)) => {
//!         println!("{}.{}: {}", verdict.class_name, method.name, violation)
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Verification is a pure function over the input bytes: no class loading, no execution, no
//! shared state. Methods are verified independently, so callers are free to fan a batch of
//! classes out across threads and aggregate the verdicts.

pub mod access_flags;
pub mod class_file;
pub mod code;
pub mod descriptors;
mod errors;
pub mod util;
pub mod verifier;

pub use errors::{ConstraintViolation, MalformedClassError, RuleId};
pub use verifier::{
    verify_class, verify_method, verify_parsed_class, ClassVerdict, MethodOutcome, MethodVerdict,
    VerifierOptions,
};
