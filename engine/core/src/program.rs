use crate::identifiers::source_digest;
use crate::ops::OperationContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProgramError {
    #[error("no program registered under the name {0}")]
    UnknownProgram(String),

    #[error("program {name} failed integrity verification")]
    DigestMismatch { name: String },
}

/// A deserialized user program: declares the operation contexts its named
/// functions execute under.
pub trait Program: Send + Sync {
    /// The user-chosen class/dataset name
    fn name(&self) -> &str;

    /// The operation contexts declared by this program
    fn operation_contexts(&self) -> Vec<OperationContext>;

    fn operation_context(&self, fun_name: &str) -> Option<OperationContext> {
        self.operation_contexts().into_iter().find(|context| context.fun_name == fun_name)
    }
}

pub type DynProgram = Arc<dyn Program>;

/// The trusted deserialization hook: given the stored source blob, the declared
/// class name and the integrity seal, produce a program instance.
///
/// Sandboxing beyond this contract (plug-in compilation, process isolation) is
/// a deployment concern layered on top.
pub trait ProgramLoader: Send + Sync {
    fn load(&self, source: &str, name: &str, digest: &str) -> Result<DynProgram, ProgramError>;
}

pub type DynProgramLoader = Arc<dyn ProgramLoader>;

/// A program declared directly in-process from its operation contexts
pub struct DeclaredProgram {
    name: String,
    contexts: Vec<OperationContext>,
}

impl DeclaredProgram {
    pub fn new(name: &str, contexts: Vec<OperationContext>) -> Self {
        Self { name: name.to_owned(), contexts }
    }
}

impl Program for DeclaredProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn operation_contexts(&self) -> Vec<OperationContext> {
        self.contexts.clone()
    }
}

/// An in-process loader over pre-registered programs.
///
/// Verifies the integrity seal of the stored source against the registered
/// blob before handing out the program instance.
#[derive(Default)]
pub struct StaticProgramLoader {
    programs: RwLock<HashMap<String, (String, DynProgram)>>,
}

impl StaticProgramLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `program` under its own name, sealed over `source`
    pub fn register(&self, source: &str, program: DynProgram) {
        self.programs.write().insert(program.name().to_owned(), (source_digest(source), program));
    }
}

impl ProgramLoader for StaticProgramLoader {
    fn load(&self, source: &str, name: &str, digest: &str) -> Result<DynProgram, ProgramError> {
        let programs = self.programs.read();
        let (sealed_digest, program) = programs.get(name).ok_or_else(|| ProgramError::UnknownProgram(name.to_owned()))?;
        if sealed_digest != digest || source_digest(source) != *sealed_digest {
            return Err(ProgramError::DigestMismatch { name: name.to_owned() });
        }
        Ok(program.clone())
    }
}
