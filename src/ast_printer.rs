use crate::ast::{
    AssignOp, BinaryOp, Block, Expr, FunctionDecl, Literal, LogicalOp, MemberKey, Program, Stmt,
    UnaryOp, UpdateOp,
};
use crate::value::number_to_string;

/// Converts a parsed program to a parenthesised prefix form, one top-level
/// statement per line.  Used by the `parse` subcommand.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print_program(program: &Program) -> String {
        program
            .body
            .iter()
            .map(Self::print_stmt)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn print_stmt(stmt: &Stmt) -> String {
        match stmt {
            Stmt::Expression(expr) => Self::print(expr),

            Stmt::Declaration {
                kind, declarations, ..
            } => {
                let mut s = format!("({:?}", kind).to_lowercase();
                for d in declarations {
                    match &d.init {
                        Some(init) => {
                            s.push_str(&format!(" (= {} {})", d.target.name, Self::print(init)))
                        }
                        None => s.push_str(&format!(" {}", d.target.name)),
                    }
                }
                s.push(')');
                s
            }

            Stmt::Function(decl) => Self::print_function(decl),

            Stmt::Block(block) => Self::print_block(block),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => match else_branch {
                Some(eb) => format!(
                    "(if {} {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch),
                    Self::print_stmt(eb)
                ),
                None => format!(
                    "(if {} {})",
                    Self::print(condition),
                    Self::print_stmt(then_branch)
                ),
            },

            Stmt::While { condition, body } => {
                format!("(while {} {})", Self::print(condition), Self::print_stmt(body))
            }

            Stmt::For {
                init,
                condition,
                update,
                body,
                ..
            } => format!(
                "(for {} {} {} {})",
                init.as_deref().map_or("()".into(), Self::print_stmt),
                condition.as_ref().map_or("()".into(), Self::print),
                update.as_ref().map_or("()".into(), Self::print),
                Self::print_stmt(body)
            ),

            Stmt::Break(_) => "(break)".into(),

            Stmt::Continue(_) => "(continue)".into(),

            Stmt::Return { value, .. } => match value {
                Some(v) => format!("(return {})", Self::print(v)),
                None => "(return)".into(),
            },

            Stmt::With { object, body, .. } => {
                format!("(with {} {})", Self::print(object), Self::print_stmt(body))
            }

            Stmt::Throw { value, .. } => format!("(throw {})", Self::print(value)),

            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                let mut s = format!("(try {}", Self::print_block(block));
                if let Some(h) = handler {
                    let param = h.param.as_ref().map_or("", |p| &*p.name);
                    s.push_str(&format!(" (catch {} {})", param, Self::print_block(&h.body)));
                }
                if let Some(f) = finalizer {
                    s.push_str(&format!(" (finally {})", Self::print_block(f)));
                }
                s.push(')');
                s
            }

            Stmt::Empty => "(empty)".into(),
        }
    }

    fn print_block(block: &Block) -> String {
        let mut s = String::from("(block");
        for stmt in &block.body {
            s.push(' ');
            s.push_str(&Self::print_stmt(stmt));
        }
        s.push(')');
        s
    }

    fn print_function(decl: &FunctionDecl) -> String {
        let keyword = if decl.is_arrow { "=>" } else { "fun" };
        let params: Vec<&str> = decl.params.iter().map(|p| &*p.name).collect();

        let mut s = format!("({}", keyword);
        if let Some(name) = &decl.name {
            s.push(' ');
            s.push_str(name);
        }
        s.push_str(&format!(" ({})", params.join(" ")));
        for stmt in &decl.body {
            s.push(' ');
            s.push_str(&Self::print_stmt(stmt));
        }
        s.push(')');
        s
    }

    pub fn print(expr: &Expr) -> String {
        match expr {
            // ── literals ────────────────────────────────────────────────
            Expr::Literal(lit) => match lit {
                Literal::Bool(b) => b.to_string(),

                Literal::Null => "null".into(),

                Literal::Str(s) => format!("{:?}", s.to_string_lossy()),

                Literal::Number(n) => number_to_string(*n),
            },

            Expr::Identifier(id) => id.name.to_string(),

            Expr::This(_) => "this".into(),

            Expr::Object { properties, .. } => {
                let mut s = String::from("(object");
                for (key, value) in properties {
                    s.push_str(&format!(" ({} {})", key, Self::print(value)));
                }
                s.push(')');
                s
            }

            Expr::Function(decl) => Self::print_function(decl),

            // ── unary operator ──────────────────────────────────────────
            Expr::Unary { op, operand, .. } => {
                format!("({} {})", unary_symbol(*op), Self::print(operand))
            }

            Expr::Update {
                op, prefix, target, ..
            } => {
                let symbol = match op {
                    UpdateOp::Increment => "++",
                    UpdateOp::Decrement => "--",
                };
                let position = if *prefix { "prefix" } else { "postfix" };
                format!("({}{} {})", position, symbol, Self::print(target))
            }

            // ── binary operator ─────────────────────────────────────────
            Expr::Binary {
                op, left, right, ..
            } => format!(
                "({} {} {})",
                binary_symbol(*op),
                Self::print(left),
                Self::print(right)
            ),

            // ── logical operator ───────────────────────────────────────
            Expr::Logical { op, left, right } => format!(
                "({} {} {})",
                match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                },
                Self::print(left),
                Self::print(right)
            ),

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => format!(
                "(? {} {} {})",
                Self::print(test),
                Self::print(consequent),
                Self::print(alternate)
            ),

            Expr::Assign {
                op, target, value, ..
            } => {
                let symbol = match op {
                    AssignOp::Assign => "=".to_owned(),
                    AssignOp::Compound(op) => format!("{}=", binary_symbol(*op)),
                };
                format!("({} {} {})", symbol, Self::print(target), Self::print(value))
            }

            Expr::Member {
                object, property, ..
            } => match property {
                MemberKey::Named(name) => format!("(. {} {})", Self::print(object), name),
                MemberKey::Computed(key) => {
                    format!("([] {} {})", Self::print(object), Self::print(key))
                }
            },

            Expr::Call {
                callee,
                arguments,
                site,
                ..
            } => {
                let head = if site.callee_is_eval_identifier() {
                    "call-eval"
                } else {
                    "call"
                };
                let mut s = format!("({} {}", head, Self::print(callee));
                for arg in arguments {
                    s.push(' ');
                    s.push_str(&Self::print(arg));
                }
                s.push(')');
                s
            }
        }
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Not => "!",
        UnaryOp::Negate => "-",
        UnaryOp::Plus => "+",
        UnaryOp::TypeOf => "typeof",
        UnaryOp::Delete => "delete",
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::StrictEqual => "===",
        BinaryOp::StrictNotEqual => "!==",
    }
}
