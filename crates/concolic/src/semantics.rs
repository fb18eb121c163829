//! Seams to the analysis collaborators: the disassembler that builds the program model, the
//! instruction-semantics operators and the constraint solver.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Errors produced by an analysis collaborator
pub type DependencyError = Box<dyn std::error::Error + Send + Sync>;

/// Program model produced by control-flow recovery.
pub trait Partitioner {
    /// Name of the specimen the model was built from
    fn specimen_name(&self) -> &str;
}

/// Disassembly and control-flow recovery engine.
pub trait Engine {
    fn partition(
        &mut self,
        specimen_name: &str,
    ) -> Result<Box<dyn Partitioner>, DependencyError>;
}

/// Location and width of a register in the register file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    /// Byte offset into the register file
    pub offset: usize,
    pub nbits: usize,
}

/// Named registers of an instruction set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterDictionary {
    name: String,
    registers: BTreeMap<String, RegisterDescriptor>,
}

impl RegisterDictionary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registers: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, name: impl Into<String>, descriptor: RegisterDescriptor) {
        self.registers.insert(name.into(), descriptor);
    }

    pub fn find(&self, name: &str) -> Option<RegisterDescriptor> {
        self.registers.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RegisterDescriptor)> {
        self.registers
            .iter()
            .map(|(name, descriptor)| (name.as_str(), *descriptor))
    }
}

/// A free variable in the symbolic domain
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolicVariable {
    pub id: u64,
    pub nbits: usize,
    pub comment: String,
}

impl fmt::Display for SymbolicVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}[{}]", self.id, self.nbits)
    }
}

/// Instruction-semantics operators the dispatcher executes against.
pub trait RiscOperators {
    /// Natural word size of the emulated machine
    fn word_size_bits(&self) -> usize;

    fn register_dictionary(&self) -> Arc<RegisterDictionary>;

    /// Introduce a fresh, unconstrained variable
    fn new_variable(&mut self, nbits: usize, comment: &str) -> SymbolicVariable;
}

/// Constraint solver the driver asks for new inputs.
pub trait SmtSolver {
    /// Make the solver aware of a variable
    fn declare(&mut self, variable: &SymbolicVariable);
}

/// Instruction sets with semantics available to a [Dispatcher]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstructionSet {
    M68k,
}

/// Binds the generic instruction-semantics interpreter to one instruction set and register file
/// shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatcher {
    pub isa: InstructionSet,
    pub word_size_bits: usize,
    pub registers: Arc<RegisterDictionary>,
}

impl Dispatcher {
    /// Dispatcher for `isa` shaped after the operator set
    pub fn new(isa: InstructionSet, ops: &dyn RiscOperators) -> Self {
        Self {
            isa,
            word_size_bits: ops.word_size_bits(),
            registers: ops.register_dictionary(),
        }
    }
}

/// Where a program input comes from
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InputSource {
    /// Command line argument by position
    Argument(usize),

    /// Environment variable by name
    Environment(String),

    /// Standard input
    Stdin,
}

/// An input source paired with the variable representing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputVariable {
    pub source: InputSource,
    pub variable: SymbolicVariable,
}

/// Symbolic variables a backend introduced for program inputs. A backend without an input
/// channel returns [InputVariables::none] rather than failing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputVariables {
    variables: Vec<InputVariable>,
}

impl InputVariables {
    /// Explicit declaration that the backend has no program inputs
    pub fn none() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: InputSource, variable: SymbolicVariable) {
        self.variables.push(InputVariable { source, variable });
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputVariable> {
        self.variables.iter()
    }
}

/// Introduce one variable per input source of a hosted program and declare each with the
/// solver: every command line argument, every environment variable and standard input.
/// Arguments and environment values are modeled as NUL-terminated byte strings of their
/// concrete length; standard input as its concrete length.
pub fn symbolize_inputs(
    test_case: &crate::store::TestCase,
    ops: &mut dyn RiscOperators,
    solver: &mut dyn SmtSolver,
) -> InputVariables {
    let mut inputs = InputVariables::none();
    let mut declare = |source: InputSource, nbytes: usize, comment: String| {
        let variable = ops.new_variable(8 * nbytes, &comment);
        solver.declare(&variable);
        inputs.push(source, variable);
    };

    for (index, argument) in test_case.arguments.iter().enumerate() {
        declare(
            InputSource::Argument(index),
            argument.len() + 1,
            format!("argv[{index}]"),
        );
    }

    for (name, value) in &test_case.environment {
        declare(
            InputSource::Environment(name.clone()),
            value.len() + 1,
            format!("env[{name}]"),
        );
    }

    if !test_case.stdin.is_empty() {
        declare(InputSource::Stdin, test_case.stdin.len(), "stdin".to_owned());
    }

    inputs
}
