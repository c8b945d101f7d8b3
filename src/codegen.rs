use std::collections::HashMap;

use inkwell::{
    builder::Builder,
    context::Context,
    module::Module,
    passes::PassManager,
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, FloatValue, FunctionValue},
    FloatPredicate,
};

use crate::ast::{Expression, Function, Prototype};

const MODULE_NAME: &str = "kaleidoscope";

/// Most recently parsed prototype of every function, used to redeclare
/// functions from earlier units in the current one.
pub type Prototypes = HashMap<String, Prototype>;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("unknown operator {0}")]
    UnknownOperator(char),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call {0} expected {1} found {2}")]
    InvalidCall(String, usize, usize),
    #[error("function {0} conflicts with an existing declaration")]
    ConflictingDeclaration(String),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
}

pub struct Codegen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    pub named_values: HashMap<String, FloatValue<'a>>,
    fpm: PassManager<FunctionValue<'a>>,
}

fn function_pass_manager<'a>(module: &Module<'a>) -> PassManager<FunctionValue<'a>> {
    let fpm = PassManager::create(module);
    fpm.add_instruction_combining_pass();
    fpm.add_reassociate_pass();
    fpm.add_gvn_pass();
    fpm.add_cfg_simplification_pass();
    fpm.initialize();
    fpm
}

impl<'a> Codegen<'a> {
    pub fn new(context: &'a Context) -> Codegen<'a> {
        let module = context.create_module(MODULE_NAME);
        let fpm = function_pass_manager(&module);
        let builder = context.create_builder();

        Codegen {
            context,
            module,
            builder,
            named_values: HashMap::new(),
            fpm,
        }
    }

    /// hands out the current unit and starts an empty one in its place
    pub fn take_module(&mut self) -> Module<'a> {
        let module = self.context.create_module(MODULE_NAME);
        self.fpm = function_pass_manager(&module);
        std::mem::replace(&mut self.module, module)
    }

    /// looks the function up in the current unit, declaring it from its last
    /// known prototype if an earlier unit defined it
    fn get_function(
        &self,
        name: &str,
        protos: &Prototypes,
    ) -> Result<Option<FunctionValue<'a>>, CodegenError> {
        if let Some(func) = self.module.get_function(name) {
            return Ok(Some(func));
        }
        protos
            .get(name)
            .map(|proto| self.compile_proto(proto))
            .transpose()
    }

    pub fn codegen_expr(
        &mut self,
        expr: &Expression,
        protos: &Prototypes,
    ) -> Result<FloatValue<'a>, CodegenError> {
        match expr {
            Expression::Literal(value) => Ok(self.context.f64_type().const_float(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(*var),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left, protos)?;
                let rhs = self.codegen_expr(right, protos)?;

                match op {
                    '+' => Ok(self.builder.build_float_add(lhs, rhs, "addtmp")),
                    '-' => Ok(self.builder.build_float_sub(lhs, rhs, "subtmp")),
                    '*' => Ok(self.builder.build_float_mul(lhs, rhs, "multmp")),
                    '<' => {
                        let cmp = self.builder.build_float_compare(
                            FloatPredicate::ULT,
                            lhs,
                            rhs,
                            "cmptmp",
                        );
                        Ok(self.builder.build_unsigned_int_to_float(
                            cmp,
                            self.context.f64_type(),
                            "booltmp",
                        ))
                    }
                    _ => Err(CodegenError::UnknownOperator(*op)),
                }
            }
            Expression::Call(callee, args) => match self.get_function(callee, protos)? {
                Some(func) => {
                    let expected = func.count_params() as usize;
                    if expected != args.len() {
                        return Err(CodegenError::InvalidCall(
                            callee.clone(),
                            expected,
                            args.len(),
                        ));
                    }

                    let mut argsv: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
                    for arg in args {
                        argsv.push(self.codegen_expr(arg, protos)?.into());
                    }

                    match self
                        .builder
                        .build_call(func, argsv.as_slice(), "calltmp")
                        .try_as_basic_value()
                        .left()
                    {
                        Some(value) => Ok(value.into_float_value()),
                        None => unreachable!("every function returns a double"),
                    }
                }
                None => Err(CodegenError::UnknownFunction(callee.clone())),
            },
        }
    }

    /// declares the prototype in the current unit, reusing a matching
    /// declaration that is already there
    pub fn compile_proto(&self, proto: &Prototype) -> Result<FunctionValue<'a>, CodegenError> {
        if let Some(existing) = self.module.get_function(&proto.name) {
            if existing.count_params() as usize == proto.args.len()
                && existing.count_basic_blocks() == 0
            {
                return Ok(existing);
            }
            return Err(CodegenError::ConflictingDeclaration(proto.name.clone()));
        }

        let args_types = std::iter::repeat(self.context.f64_type())
            .take(proto.args.len())
            .map(|f| f.into())
            .collect::<Vec<BasicMetadataTypeEnum>>();

        let fn_type = self.context.f64_type().fn_type(&args_types, false);
        let fn_val = self.module.add_function(&proto.name, fn_type, None);

        for (arg, name) in fn_val.get_param_iter().zip(&proto.args) {
            arg.into_float_value().set_name(name);
        }

        Ok(fn_val)
    }

    pub fn compile_fn(
        &mut self,
        function: &Function,
        protos: &mut Prototypes,
    ) -> Result<FunctionValue<'a>, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        let previous = protos.insert(proto.name.clone(), proto.clone());
        let result = self.compile_body(proto, body, protos);
        if result.is_err() {
            match previous {
                Some(previous) => protos.insert(proto.name.clone(), previous),
                None => protos.remove(&proto.name),
            };
        }
        result
    }

    fn compile_body(
        &mut self,
        proto: &Prototype,
        body: &Expression,
        protos: &Prototypes,
    ) -> Result<FunctionValue<'a>, CodegenError> {
        let llvm_func = self.compile_proto(proto)?;

        let entry = self.context.append_basic_block(llvm_func, "entry");
        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(proto.args.len());
        for (arg, name) in llvm_func.get_param_iter().zip(&proto.args) {
            self.named_values.insert(name.clone(), arg.into_float_value());
        }

        let body = match self.codegen_expr(body, protos) {
            Ok(body) => body,
            Err(err) => {
                unsafe {
                    llvm_func.delete();
                }
                return Err(err);
            }
        };

        self.builder.build_return(Some(&body));

        if llvm_func.verify(true) {
            self.fpm.run_on(&llvm_func);
            Ok(llvm_func)
        } else {
            unsafe {
                llvm_func.delete();
            }

            Err(CodegenError::InvalidFunction(proto.name.clone()))
        }
    }
}
