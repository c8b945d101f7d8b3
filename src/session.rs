use std::fmt;
use std::io::{self, Write};

use inkwell::{context::Context, values::AnyValue, OptimizationLevel};

use crate::ast::ANON_FN_NAME;
use crate::backend::ExecutionBackend;
use crate::codegen::{Codegen, CodegenError, Prototypes};
use crate::lexer::{Lexer, Token};
use crate::parser::{Parser, ParserError};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub prompt: String,
    pub dump_ir: bool,
    pub opt_level: OptimizationLevel,
}

impl std::default::Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: "ready> ".to_string(),
            dump_ir: true,
            opt_level: OptimizationLevel::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstructKind {
    Definition,
    Extern,
    Expression,
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructKind::Definition => write!(f, "function definition"),
            ConstructKind::Extern => write!(f, "extern"),
            ConstructKind::Expression => write!(f, "top-level expression"),
        }
    }
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ConstructError {
    #[error("failed to parse {0}: {1}")]
    Parse(ConstructKind, ParserError),
    #[error("failed to compile {0}: {1}")]
    Codegen(ConstructKind, CodegenError),
}

/// What a single top-level step did.
#[derive(Debug, PartialEq, Clone)]
pub enum Outcome {
    Empty,
    Defined(String),
    Declared(String),
    Evaluated(f64),
    Failed(ConstructError),
}

/// Incremental compile-and-run loop. Each top-level construct gets its own
/// compilation unit; definitions are handed to the backend and stay callable,
/// top-level expressions are run once and then dropped.
pub struct Session<'ctx, I, W, B>
where
    I: Iterator<Item = char>,
    W: Write,
    B: ExecutionBackend<'ctx>,
{
    config: SessionConfig,
    parser: Parser<I>,
    codegen: Codegen<'ctx>,
    backend: B,
    prototypes: Prototypes,
    diagnostics: W,
}

impl<'ctx, I, W, B> Session<'ctx, I, W, B>
where
    I: Iterator<Item = char>,
    W: Write,
    B: ExecutionBackend<'ctx>,
{
    pub fn new(
        context: &'ctx Context,
        input: I,
        backend: B,
        diagnostics: W,
        config: SessionConfig,
    ) -> Self {
        Self {
            config,
            parser: Parser::new(Lexer::new(input)),
            codegen: Codegen::new(context),
            backend,
            prototypes: Prototypes::new(),
            diagnostics,
        }
    }

    fn prompt(&mut self) -> io::Result<()> {
        write!(self.diagnostics, "{}", self.config.prompt)?;
        self.diagnostics.flush()
    }

    fn trace(&mut self, header: &str, ir: &str) -> io::Result<()> {
        writeln!(self.diagnostics, "{}", header)?;
        if self.config.dump_ir {
            writeln!(self.diagnostics, "{}", ir.trim_end())?;
        }
        Ok(())
    }

    fn fail(&mut self, error: ConstructError) -> io::Result<Outcome> {
        writeln!(self.diagnostics, "error: {}", error)?;
        Ok(Outcome::Failed(error))
    }

    fn codegen_failed(&mut self, kind: ConstructKind, error: CodegenError) -> io::Result<Outcome> {
        // declarations pulled into the unit for the failed construct would
        // otherwise shadow the registry for the next one
        self.codegen.take_module();
        self.fail(ConstructError::Codegen(kind, error))
    }

    fn parse_failed(&mut self, kind: ConstructKind, error: ParserError) -> io::Result<Outcome> {
        // skip the offending token so the next step makes progress
        self.parser.advance();
        self.fail(ConstructError::Parse(kind, error))
    }

    /// shows the first prompt and reads the first token
    pub fn start(&mut self) -> io::Result<()> {
        self.prompt()?;
        self.parser.advance();
        Ok(())
    }

    /// Handles one top-level construct. Returns `None` once the input is
    /// exhausted. Errors are fatal: either the diagnostic stream failed or the
    /// backend lost track of something the code generator produced.
    pub fn step(&mut self) -> anyhow::Result<Option<Outcome>> {
        self.prompt()?;
        let outcome = match self.parser.current().clone() {
            Token::Eof => return Ok(None),
            Token::Char(';') => {
                self.parser.advance();
                Outcome::Empty
            }
            Token::Def => self.handle_definition()?,
            Token::Extern => self.handle_extern()?,
            _ => self.handle_top_level_expression()?,
        };
        Ok(Some(outcome))
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        self.start()?;
        while self.step()?.is_some() {}
        writeln!(self.diagnostics)?;
        Ok(())
    }

    fn handle_definition(&mut self) -> anyhow::Result<Outcome> {
        let kind = ConstructKind::Definition;
        let function = match self.parser.parse_definition() {
            Ok(function) => function,
            Err(err) => return Ok(self.parse_failed(kind, err)?),
        };

        let ir = match self.codegen.compile_fn(&function, &mut self.prototypes) {
            Ok(value) => value.print_to_string().to_string(),
            Err(err) => return Ok(self.codegen_failed(kind, err)?),
        };
        self.trace("Read function definition:", &ir)?;

        let unit = self.codegen.take_module();
        self.backend.add_module(unit)?;
        Ok(Outcome::Defined(function.prototype.name))
    }

    fn handle_extern(&mut self) -> anyhow::Result<Outcome> {
        let kind = ConstructKind::Extern;
        let proto = match self.parser.parse_extern() {
            Ok(proto) => proto,
            Err(err) => return Ok(self.parse_failed(kind, err)?),
        };

        let ir = match self.codegen.compile_proto(&proto) {
            Ok(value) => value.print_to_string().to_string(),
            Err(err) => return Ok(self.codegen_failed(kind, err)?),
        };
        self.trace("Read extern:", &ir)?;

        let name = proto.name.clone();
        self.prototypes.insert(name.clone(), proto);
        Ok(Outcome::Declared(name))
    }

    fn handle_top_level_expression(&mut self) -> anyhow::Result<Outcome> {
        let kind = ConstructKind::Expression;
        let function = match self.parser.parse_top_level_expr() {
            Ok(function) => function,
            Err(err) => return Ok(self.parse_failed(kind, err)?),
        };

        let compiled = self.codegen.compile_fn(&function, &mut self.prototypes);
        // the anonymous function never outlives its own evaluation
        self.prototypes.remove(ANON_FN_NAME);
        let ir = match compiled {
            Ok(value) => value.print_to_string().to_string(),
            Err(err) => return Ok(self.codegen_failed(kind, err)?),
        };
        self.trace("Read top-level expression:", &ir)?;

        let unit = self.codegen.take_module();
        let handle = self.backend.add_module(unit)?;
        let result = self.backend.invoke(ANON_FN_NAME);
        self.backend.remove_module(handle)?;
        let result = result?;

        writeln!(self.diagnostics, "Evaluated to {}", result)?;
        Ok(Outcome::Evaluated(result))
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::Expression;
    use crate::backend::JitBackend;

    type TestSession<'ctx, 'src> =
        Session<'ctx, std::str::Chars<'src>, Vec<u8>, JitBackend<'ctx>>;

    fn session<'ctx, 'src>(context: &'ctx Context, src: &'src str) -> TestSession<'ctx, 'src> {
        let backend = JitBackend::new(context, OptimizationLevel::None);
        let mut session = Session::new(
            context,
            src.chars(),
            backend,
            Vec::new(),
            SessionConfig::default(),
        );
        session.start().unwrap();
        session
    }

    fn drain(session: &mut TestSession<'_, '_>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = session.step().unwrap() {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn evaluated(src: &str) -> Vec<f64> {
        let context = Context::create();
        let mut session = session(&context, src);
        drain(&mut session)
            .into_iter()
            .filter_map(|outcome| match outcome {
                Outcome::Evaluated(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn precedence() {
        assert_eq!(evaluated("1 + 2 * 3;"), vec![7.0]);
    }

    #[test]
    fn left_associativity() {
        assert_eq!(evaluated("1 - 2 - 3;"), vec![-4.0]);
    }

    #[test]
    fn comparison_encoding() {
        assert_eq!(evaluated("1 < 2; 2 < 1;"), vec![1.0, 0.0]);
    }

    #[test]
    fn comments_contribute_nothing() {
        assert_eq!(evaluated("# this is ignored\n1+1"), vec![2.0]);
    }

    #[test]
    fn redefinition_wins() {
        assert_eq!(
            evaluated("def f(x) x+1; f(1); def f(x) x*2; f(1); f(5);"),
            vec![2.0, 2.0, 10.0]
        );
    }

    #[test]
    fn callers_see_redefinition() {
        assert_eq!(
            evaluated("def f(x) x+1; def g(x) f(x)*10; g(1); def f(x) x; g(1);"),
            vec![20.0, 10.0]
        );
    }

    #[test]
    fn recovers_after_parse_error() {
        let context = Context::create();
        let mut session = session(&context, "def (\n1+1;");
        let outcomes = drain(&mut session);

        assert!(matches!(
            outcomes[0],
            Outcome::Failed(ConstructError::Parse(ConstructKind::Definition, _))
        ));
        assert_eq!(outcomes[1], Outcome::Evaluated(2.0));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let context = Context::create();
        let mut session = session(&context, "def zero() 0; zero(1); def one(x) x; one(); one(3);");
        let outcomes = drain(&mut session);

        assert_eq!(
            outcomes,
            vec![
                Outcome::Defined("zero".to_string()),
                Outcome::Empty,
                Outcome::Failed(ConstructError::Codegen(
                    ConstructKind::Expression,
                    CodegenError::InvalidCall("zero".to_string(), 0, 1),
                )),
                Outcome::Empty,
                Outcome::Defined("one".to_string()),
                Outcome::Empty,
                Outcome::Failed(ConstructError::Codegen(
                    ConstructKind::Expression,
                    CodegenError::InvalidCall("one".to_string(), 1, 0),
                )),
                Outcome::Empty,
                Outcome::Evaluated(3.0),
                Outcome::Empty,
            ]
        );
    }

    #[test]
    fn redefinition_after_failed_call_changes_arity() {
        let context = Context::create();
        let mut session = session(&context, "def zero() 0; zero(1); def zero(x) x; zero(5);");
        let outcomes = drain(&mut session);

        assert!(matches!(
            outcomes[2],
            Outcome::Failed(ConstructError::Codegen(
                ConstructKind::Expression,
                CodegenError::InvalidCall(..)
            ))
        ));
        assert_eq!(outcomes[4], Outcome::Defined("zero".to_string()));
        assert_eq!(outcomes[6], Outcome::Evaluated(5.0));
    }

    #[test]
    fn failed_definition_discards_its_unit() {
        let context = Context::create();
        let mut session = session(
            &context,
            "def one(x) x; def bad() one() + nope; def one(a b) a + b; one(2, 3);",
        );
        let outcomes = drain(&mut session);

        assert!(matches!(outcomes[2], Outcome::Failed(_)));
        assert_eq!(outcomes[4], Outcome::Defined("one".to_string()));
        assert_eq!(outcomes[6], Outcome::Evaluated(5.0));
        assert!(session.codegen.module.get_function("one").is_none());
    }

    #[test]
    fn anonymous_function_does_not_persist() {
        let context = Context::create();
        let mut session = session(&context, "1 + 1");
        assert_eq!(drain(&mut session), vec![Outcome::Evaluated(2.0)]);

        let call = Expression::Call(ANON_FN_NAME.to_string(), vec![]);
        assert_eq!(
            session.codegen.codegen_expr(&call, &session.prototypes),
            Err(CodegenError::UnknownFunction(ANON_FN_NAME.to_string()))
        );
    }

    #[test]
    fn externs_resolve_to_builtins_and_libm() {
        assert_eq!(
            evaluated("extern printd(x); printd(1); extern sin(x); sin(0);"),
            vec![0.0, 0.0]
        );
    }

    #[test]
    fn extern_then_definition_in_later_unit() {
        assert_eq!(
            evaluated("extern later(x); def later(x) x * 3; later(2);"),
            vec![6.0]
        );
    }

    #[test]
    fn diagnostics_are_written() {
        let context = Context::create();
        let mut session = session(&context, "def id(x) x; id(4); nope;");
        drain(&mut session);

        let output = String::from_utf8(session.diagnostics.clone()).unwrap();
        assert!(output.starts_with("ready> "));
        assert!(output.contains("Read function definition:"));
        assert!(output.contains("define double @id(double %x)"));
        assert!(output.contains("Read top-level expression:"));
        assert!(output.contains("Evaluated to 4"));
        assert!(output
            .contains("error: failed to compile top-level expression: unknown variable referenced nope"));
    }

    #[test]
    fn ir_dump_can_be_disabled() {
        let context = Context::create();
        let config = SessionConfig {
            prompt: String::new(),
            dump_ir: false,
            ..SessionConfig::default()
        };
        let backend = JitBackend::new(&context, OptimizationLevel::None);
        let mut session = Session::new(&context, "def id(x) x".chars(), backend, Vec::new(), config);
        session.run().unwrap();

        let output = String::from_utf8(session.diagnostics.clone()).unwrap();
        assert_eq!(output, "Read function definition:\n\n");
    }
}
