//! Compiler: procedure tree → flat bytecode
//!
//! Nested loops and branches are lowered to relative jumps so the VM only
//! ever needs a flat instruction pointer per call frame.
//!
//! Loop layout (`n` = body length):
//!
//! ```text
//! push_iter
//! jump_if_empty +(n+3)    ; exits just past end_loop
//! next_item
//! <body>
//! jump -(n+3)             ; back to jump_if_empty
//! end_loop
//! ```
//!
//! Branch layout, per case: `jump_if_no_match +(n+1) label, <body>, jump →end`,
//! followed by the default body. Exit jumps are patched once the total length
//! is known.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::ast::{Block, Procedure, ProcedureBody, SqlMode, Statement};
use super::executor::types::ByteCode;
use super::text::normalize;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("`break` outside of a loop in procedure '{procedure}'")]
    BreakOutsideLoop { procedure: String },
}

/* ===================== Compiled Program ===================== */

/// Immutable instruction table for one run.
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    /// Procedure names in declaration order
    pub order: Vec<String>,
    pub code: HashMap<String, Arc<[ByteCode]>>,
}

impl CompiledProgram {
    pub fn get(&self, name: &str) -> Option<&Arc<[ByteCode]>> {
        self.code.get(name)
    }

    /// The first declared procedure.
    pub fn first(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }
}

/* ===================== Public API ===================== */

pub fn compile_program(procedures: &[Procedure]) -> Result<CompiledProgram, CompileError> {
    let mut program = CompiledProgram::default();
    for procedure in procedures {
        let code = compile_procedure(procedure)?;
        program.order.push(procedure.name.clone());
        program.code.insert(procedure.name.clone(), code.into());
    }
    Ok(program)
}

pub fn compile_procedure(procedure: &Procedure) -> Result<Vec<ByteCode>, CompileError> {
    match &procedure.body {
        ProcedureBody::Llm(llm) => Ok(vec![ByteCode::CallModel {
            procedure: Box::new(llm.clone()),
        }]),
        ProcedureBody::Statements(block) => {
            let mut compiler = Compiler {
                procedure: &procedure.name,
                loop_depth: 0,
            };
            compiler.block(block)
        }
    }
}

/* ===================== Lowering ===================== */

struct Compiler<'a> {
    procedure: &'a str,
    loop_depth: usize,
}

impl Compiler<'_> {
    fn block(&mut self, block: &Block) -> Result<Vec<ByteCode>, CompileError> {
        let mut out = Vec::new();
        for statement in &block.statements {
            self.statement(statement, &mut out)?;
        }
        Ok(out)
    }

    fn statement(&mut self, statement: &Statement, out: &mut Vec<ByteCode>) -> Result<(), CompileError> {
        match statement {
            Statement::SetVariable { name } => out.push(ByteCode::SetVariable { name: name.clone() }),
            Statement::FetchVariable { name } => {
                out.push(ByteCode::FetchVariable { name: name.clone() })
            }
            Statement::FormatString { template } => out.push(ByteCode::FormatString {
                template: template.clone(),
            }),
            Statement::AskQuestions { questions } => out.push(ByteCode::Ask {
                questions: questions.clone(),
            }),
            Statement::Call { name } => out.push(ByteCode::Call { name: name.clone() }),

            Statement::ForEachLine { body } => self.lower_loop(ByteCode::PushLineIterator, Some(body), out)?,
            Statement::ForEachParagraph { body } => {
                self.lower_loop(ByteCode::PushParagraphIterator, Some(body), out)?
            }
            Statement::Sql(sql) => {
                let push = ByteCode::PushSqlIterator {
                    query: sql.query.clone(),
                    read_only: sql.mode == SqlMode::ReadOnly,
                };
                self.lower_loop(push, sql.body.as_ref(), out)?
            }

            Statement::Branch { cases, default } => {
                let mut exits = Vec::with_capacity(cases.len());
                for case in cases {
                    let body = self.block(&case.body)?;
                    out.push(ByteCode::JumpIfNoMatch {
                        offset: body.len() as isize + 1,
                        label: normalize(&case.label),
                    });
                    out.extend(body);
                    exits.push(out.len());
                    out.push(ByteCode::Jump { offset: 0 });
                }
                if let Some(default) = default {
                    out.extend(self.block(default)?);
                }
                let end = out.len();
                for idx in exits {
                    out[idx] = ByteCode::Jump {
                        offset: (end - idx - 1) as isize,
                    };
                }
            }

            Statement::Break => {
                if self.loop_depth == 0 {
                    return Err(CompileError::BreakOutsideLoop {
                        procedure: self.procedure.to_string(),
                    });
                }
                out.push(ByteCode::Break);
            }
        }
        Ok(())
    }

    fn lower_loop(
        &mut self,
        push: ByteCode,
        body: Option<&Block>,
        out: &mut Vec<ByteCode>,
    ) -> Result<(), CompileError> {
        self.loop_depth += 1;
        let body = match body {
            Some(body) => self.block(body),
            None => Ok(Vec::new()),
        };
        self.loop_depth -= 1;
        let body = body?;

        let span = body.len() as isize + 3;
        out.push(push);
        out.push(ByteCode::JumpIfIteratorEmpty { offset: span });
        out.push(ByteCode::PushNextItem);
        out.extend(body);
        out.push(ByteCode::Jump { offset: -span });
        out.push(ByteCode::EndLoop);
        Ok(())
    }
}
