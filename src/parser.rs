/*!
Recursive‑descent parser for the engine's JavaScript subset.

### Cost

Each token is consumed once via `advance()`; the only look‑ahead beyond one
token is the arrow‑function check, which scans to the matching `)`.

### Nesting limit

Every recursive descent and every link of a left‑associative operator chain
counts against [`MAX_NESTING`].  Exceeding it yields the fatal
[`EngineError::StackOverflow`] rather than a `SyntaxError`, so hosts can tell
runaway inputs (for example huge generated concatenations fed to `eval`)
apart from malformed code.

### Logging Policy

| Location                     | Level  | Purpose                                   |
|------------------------------|--------|-------------------------------------------|
| `Parser::new`, `parse`       | `info` | Lifecycle milestones.                     |
| `declaration`, `statement`   | `debug`| High‑level descent into grammar branches. |

--------------------------------------------------------------------------------
Grammar (EBNF, condensed)
--------------------------

```text
program        → directive* declaration* EOF ;
declaration    → funDecl | lexDecl | statement ;
funDecl        → "function" IDENT "(" parameters? ")" block ;
lexDecl        → ( "var" | "let" | "const" ) declarator ( "," declarator )* ";" ;
statement      → exprStmt | ifStmt | whileStmt | forStmt | block | returnStmt
               | breakStmt | continueStmt | withStmt | throwStmt | tryStmt | ";" ;
expression     → assignment ;
assignment     → target ( "=" | "+=" | "-=" | "*=" | "/=" | "%=" ) assignment
               | arrow | conditional ;
conditional    → logic_or ( "?" assignment ":" assignment )? ;
logic_or       → logic_and ( "||" logic_and )* ;
logic_and      → equality  ( "&&" equality )* ;
equality       → comparison ( ( "==" | "!=" | "===" | "!==" ) comparison )* ;
comparison     → term ( ( ">" | ">=" | "<" | "<=" ) term )* ;
term           → factor ( ( "-" | "+" ) factor )* ;
factor         → unary ( ( "/" | "*" | "%" ) unary )* ;
unary          → ( "!" | "-" | "+" | "typeof" | "delete" | "++" | "--" ) unary
               | postfix ;
postfix        → call ( "++" | "--" )? ;
call           → primary ( "(" arguments? ")" | "." name | "[" expression "]" )* ;
primary        → NUMBER | STRING | "true" | "false" | "null" | "this" | IDENT
               | "(" expression ")" | object | functionExpr ;
```

Semicolons are optional before `}`, at end of input, and after a line break.
*/

use std::cell::{Cell, OnceCell};
use std::rc::Rc;

use crate::ast::{
    AssignOp, BinaryOp, Block, CatchClause, Declarator, EvalCallSite, Expr, FunctionDecl,
    Identifier, Literal, LogicalOp, MemberKey, Name, Program, Stmt, UnaryOp, UpdateOp,
};
use crate::environment::DeclKind;
use crate::error::{EngineError, Result};
use crate::scanner::scan_all;
use crate::token::{Token, TokenType};

use log::{debug, info};

/// Maximum syntactic nesting before parsing fails with `StackOverflow`.
pub const MAX_NESTING: usize = 1000;

/// Maximum number of declared parameters or call arguments.
pub const MAX_PARAMETERS: usize = 255;

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Scan and parse `source` as a complete program.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = scan_all(source)?;
    let mut parser = Parser::new(&tokens);
    parser.parse()
}

/// Top‑level parser over an immutable slice of tokens.
pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    current: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    /// Construct a new parser.  `tokens` must end with an `EOF` token.
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        info!("Parser created with {} tokens", tokens.len());

        Self {
            tokens,
            current: 0,
            nesting: 0,
        }
    }

    // ───────────────────────── public API ─────────────────────────

    /// Parse an entire program.
    pub fn parse(&mut self) -> Result<Program> {
        info!("Beginning parse phase");

        let mut statements: Vec<Stmt> = Vec::new();

        while !self.is_at_end() {
            statements.push(self.declaration()?);
        }

        let strict = has_use_strict(&statements);

        Ok(Program::new(statements, strict))
    }

    /// Parse a single expression followed by end of input.
    pub fn parse_expression(&mut self) -> Result<Expr> {
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(EngineError::parse(self.peek().line, "Unexpected token after expression"));
        }

        Ok(expr)
    }

    // ──────────────────────── nesting guard ───────────────────────

    fn enter(&mut self) -> Result<()> {
        self.nesting += 1;

        if self.nesting > MAX_NESTING {
            debug!("Nesting limit exceeded at line {}", self.peek().line);
            return Err(EngineError::StackOverflow);
        }

        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// Each link of a left‑associative chain deepens the tree by one.
    fn check_chain(&self, links: usize) -> Result<()> {
        if self.nesting + links > MAX_NESTING {
            return Err(EngineError::StackOverflow);
        }

        Ok(())
    }

    // ──────────────────────── declaration rules ───────────────────

    fn declaration(&mut self) -> Result<Stmt> {
        debug!("Entering declaration");

        self.enter()?;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            if self.check(TokenType::FUNCTION) && self.peek_next_is(TokenType::IDENTIFIER) {
                self.advance();
                let decl = self.function(true)?;
                Ok(Stmt::Function(Rc::new(decl)))
            } else if self.matches(TokenType::VAR) {
                self.var_declaration(DeclKind::Var)
            } else if self.matches(TokenType::LET) {
                self.var_declaration(DeclKind::Let)
            } else if self.matches(TokenType::CONST) {
                self.var_declaration(DeclKind::Const)
            } else {
                self.statement()
            }
        });
        self.leave();

        result
    }

    /// Parses after the `function` keyword.
    fn function(&mut self, is_declaration: bool) -> Result<FunctionDecl> {
        let line = self.previous().line;

        let name: Option<Name> = if self.matches(TokenType::IDENTIFIER) {
            Some(Rc::from(self.previous().lexeme))
        } else if is_declaration {
            return Err(EngineError::parse(line, "Expected function name"));
        } else {
            None
        };

        self.consume(TokenType::LEFT_PAREN, "Expected '(' after function name")?;
        let params = self.parameters()?;
        self.consume(TokenType::LEFT_BRACE, "Expected '{' before function body")?;
        let body = self.block_body()?;

        Ok(new_function(name, params, body, false, is_declaration, line))
    }

    /// Parameter list up to and including the closing `)`.
    fn parameters(&mut self) -> Result<Vec<Identifier>> {
        let mut params: Vec<Identifier> = Vec::new();

        if !self.check(TokenType::RIGHT_PAREN) {
            loop {
                if params.len() >= MAX_PARAMETERS {
                    return Err(EngineError::parse(
                        self.peek().line,
                        "Cannot have more than 255 parameters",
                    ));
                }

                let tok = self.consume(TokenType::IDENTIFIER, "Expected parameter name")?;
                params.push(Identifier::new(Rc::from(tok.lexeme), tok.line));

                if !self.matches(TokenType::COMMA) {
                    break;
                }
            }
        }

        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after parameters")?;

        Ok(params)
    }

    fn var_declaration(&mut self, kind: DeclKind) -> Result<Stmt> {
        let stmt = self.declarators(kind)?;
        self.consume_semicolon("Expected ';' after variable declaration")?;
        Ok(stmt)
    }

    fn declarators(&mut self, kind: DeclKind) -> Result<Stmt> {
        let line = self.previous().line;
        let mut declarations: Vec<Declarator> = Vec::new();

        loop {
            let tok = self.consume(TokenType::IDENTIFIER, "Expected variable name")?;
            let target = Identifier::new(Rc::from(tok.lexeme), tok.line);

            let init: Option<Expr> = if self.matches(TokenType::EQUAL) {
                Some(self.assignment()?)
            } else {
                None
            };

            if kind == DeclKind::Const && init.is_none() {
                return Err(EngineError::parse(
                    tok.line,
                    "Missing initializer in const declaration",
                ));
            }

            declarations.push(Declarator { target, init });

            if !self.matches(TokenType::COMMA) {
                break;
            }
        }

        Ok(Stmt::Declaration {
            kind,
            declarations,
            line,
        })
    }

    // ───────────────────────── statement rules ────────────────────

    fn statement(&mut self) -> Result<Stmt> {
        debug!("Entering statement at line {}", self.peek().line);

        if self.matches(TokenType::FOR) {
            self.for_statement()
        } else if self.matches(TokenType::IF) {
            self.if_statement()
        } else if self.matches(TokenType::WHILE) {
            self.while_statement()
        } else if self.matches(TokenType::RETURN) {
            self.return_statement()
        } else if self.matches(TokenType::BREAK) {
            let line = self.previous().line;
            self.consume_semicolon("Expected ';' after 'break'")?;
            Ok(Stmt::Break(line))
        } else if self.matches(TokenType::CONTINUE) {
            let line = self.previous().line;
            self.consume_semicolon("Expected ';' after 'continue'")?;
            Ok(Stmt::Continue(line))
        } else if self.matches(TokenType::WITH) {
            self.with_statement()
        } else if self.matches(TokenType::THROW) {
            self.throw_statement()
        } else if self.matches(TokenType::TRY) {
            self.try_statement()
        } else if self.matches(TokenType::LEFT_BRACE) {
            Ok(Stmt::Block(Block::new(self.block_body()?)))
        } else if self.matches(TokenType::SEMICOLON) {
            Ok(Stmt::Empty)
        } else {
            self.expression_statement()
        }
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'for'")?;

        let init = if self.matches(TokenType::SEMICOLON) {
            None
        } else {
            let stmt = if self.matches(TokenType::VAR) {
                self.declarators(DeclKind::Var)?
            } else if self.matches(TokenType::LET) {
                self.declarators(DeclKind::Let)?
            } else if self.matches(TokenType::CONST) {
                self.declarators(DeclKind::Const)?
            } else {
                Stmt::Expression(self.expression()?)
            };
            self.consume(TokenType::SEMICOLON, "Expected ';' after loop initializer")?;
            Some(Box::new(stmt))
        };

        let condition = if !self.check(TokenType::SEMICOLON) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::SEMICOLON, "Expected ';' after loop condition")?;

        let update = if !self.check(TokenType::RIGHT_PAREN) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after for clauses")?;

        let body = Box::new(self.nested_statement()?);

        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
            layout: OnceCell::new(),
        })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'if'")?;
        let condition: Expr = self.expression()?;
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after condition")?;

        let then_branch: Box<Stmt> = Box::new(self.nested_statement()?);
        let else_branch: Option<Box<Stmt>> = if self.matches(TokenType::ELSE) {
            Some(Box::new(self.nested_statement()?))
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'while'")?;
        let condition: Expr = self.expression()?;
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after condition")?;
        let body: Box<Stmt> = Box::new(self.nested_statement()?);

        Ok(Stmt::While { condition, body })
    }

    fn with_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;
        self.consume(TokenType::LEFT_PAREN, "Expected '(' after 'with'")?;
        let object: Expr = self.expression()?;
        self.consume(TokenType::RIGHT_PAREN, "Expected ')' after with object")?;
        let body: Box<Stmt> = Box::new(self.nested_statement()?);

        Ok(Stmt::With { object, body, line })
    }

    fn throw_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;

        if self.peek().line > line {
            return Err(EngineError::parse(line, "Illegal newline after throw"));
        }

        let value = self.expression()?;
        self.consume_semicolon("Expected ';' after throw value")?;

        Ok(Stmt::Throw { value, line })
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;

        self.consume(TokenType::LEFT_BRACE, "Expected '{' after 'try'")?;
        let block = Block::new(self.block_body()?);

        let handler = if self.matches(TokenType::CATCH) {
            let param = if self.matches(TokenType::LEFT_PAREN) {
                let tok = self.consume(TokenType::IDENTIFIER, "Expected catch parameter name")?;
                let param = Identifier::new(Rc::from(tok.lexeme), tok.line);
                self.consume(TokenType::RIGHT_PAREN, "Expected ')' after catch parameter")?;
                Some(param)
            } else {
                None
            };

            self.consume(TokenType::LEFT_BRACE, "Expected '{' before catch body")?;
            let body = Block::new(self.block_body()?);

            Some(CatchClause {
                param,
                body,
                layout: OnceCell::new(),
            })
        } else {
            None
        };

        let finalizer = if self.matches(TokenType::FINALLY) {
            self.consume(TokenType::LEFT_BRACE, "Expected '{' after 'finally'")?;
            Some(Block::new(self.block_body()?))
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(EngineError::parse(line, "Missing catch or finally after try"));
        }

        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
            line,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        let line = self.previous().line;

        // `return` followed by a line break returns undefined.
        let value: Option<Expr> = if self.check(TokenType::SEMICOLON)
            || self.check(TokenType::RIGHT_BRACE)
            || self.is_at_end()
            || self.peek().line > line
        {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume_semicolon("Expected ';' after return value")?;

        Ok(Stmt::Return { value, line })
    }

    fn expression_statement(&mut self) -> Result<Stmt> {
        let expr: Expr = self.expression()?;
        self.consume_semicolon("Expected ';' after expression")?;
        Ok(Stmt::Expression(expr))
    }

    /// Body of `if`/`while`/`for`/`with`, which may itself nest arbitrarily.
    fn nested_statement(&mut self) -> Result<Stmt> {
        self.enter()?;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.statement());
        self.leave();
        result
    }

    /// Statements up to and including the closing `}`.
    fn block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut statements: Vec<Stmt> = Vec::new();

        while !self.check(TokenType::RIGHT_BRACE) && !self.is_at_end() {
            statements.push(self.declaration()?);
        }

        self.consume(TokenType::RIGHT_BRACE, "Expected '}' after block")?;
        Ok(statements)
    }

    // ─────────────────────── expression rules ─────────────────────

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.assignment_inner());
        self.leave();
        result
    }

    fn assignment_inner(&mut self) -> Result<Expr> {
        if self.arrow_ahead() {
            return self.arrow_function();
        }

        let expr: Expr = self.conditional()?;

        let op = match self.peek().token_type {
            TokenType::EQUAL => AssignOp::Assign,
            TokenType::PLUS_EQUAL => AssignOp::Compound(BinaryOp::Add),
            TokenType::MINUS_EQUAL => AssignOp::Compound(BinaryOp::Sub),
            TokenType::STAR_EQUAL => AssignOp::Compound(BinaryOp::Mul),
            TokenType::SLASH_EQUAL => AssignOp::Compound(BinaryOp::Div),
            TokenType::PERCENT_EQUAL => AssignOp::Compound(BinaryOp::Rem),
            _ => return Ok(expr),
        };

        let equals: &Token<'_> = self.advance();

        if !matches!(expr, Expr::Identifier(_) | Expr::Member { .. }) {
            return Err(EngineError::parse(equals.line, "Invalid assignment target"));
        }

        let value: Expr = self.assignment()?;

        Ok(Expr::Assign {
            op,
            target: Box::new(expr),
            value: Box::new(value),
            line: equals.line,
        })
    }

    /// `x =>` or `( … ) =>` at the current position.
    fn arrow_ahead(&self) -> bool {
        if self.check(TokenType::IDENTIFIER) {
            return self.peek_next_is(TokenType::ARROW);
        }

        if !self.check(TokenType::LEFT_PAREN) {
            return false;
        }

        let mut depth = 0usize;
        for (offset, tok) in self.tokens[self.current..].iter().enumerate() {
            match tok.token_type {
                TokenType::LEFT_PAREN => depth += 1,
                TokenType::RIGHT_PAREN => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(self.current + offset + 1)
                            .is_some_and(|t| t.token_type == TokenType::ARROW);
                    }
                }
                TokenType::EOF => return false,
                _ => {}
            }
        }

        false
    }

    fn arrow_function(&mut self) -> Result<Expr> {
        let line = self.peek().line;

        let params = if self.matches(TokenType::IDENTIFIER) {
            let tok = self.previous();
            vec![Identifier::new(Rc::from(tok.lexeme), tok.line)]
        } else {
            self.consume(TokenType::LEFT_PAREN, "Expected '(' before arrow parameters")?;
            self.parameters()?
        };

        self.consume(TokenType::ARROW, "Expected '=>' after arrow parameters")?;

        let body = if self.matches(TokenType::LEFT_BRACE) {
            self.block_body()?
        } else {
            let value = self.assignment()?;
            let line = value.line();
            vec![Stmt::Return {
                value: Some(value),
                line,
            }]
        };

        let decl = new_function(None, params, body, true, false, line);
        Ok(Expr::Function(Rc::new(decl)))
    }

    fn conditional(&mut self) -> Result<Expr> {
        let test: Expr = self.logical_or()?;

        if !self.matches(TokenType::QUESTION) {
            return Ok(test);
        }

        let consequent: Expr = self.assignment()?;
        self.consume(TokenType::COLON, "Expected ':' in conditional expression")?;
        let alternate: Expr = self.assignment()?;

        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> Result<Expr> {
        let mut expr: Expr = self.logical_and()?;
        let mut links = 0;

        while self.matches(TokenType::OR_OR) {
            links += 1;
            self.check_chain(links)?;
            let right: Expr = self.logical_and()?;

            expr = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expr> {
        let mut expr: Expr = self.equality()?;
        let mut links = 0;

        while self.matches(TokenType::AND_AND) {
            links += 1;
            self.check_chain(links)?;
            let right: Expr = self.equality()?;

            expr = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Shared loop for the left‑associative binary levels.
    fn binary_level(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr>,
        operator: fn(&TokenType) -> Option<BinaryOp>,
    ) -> Result<Expr> {
        let mut expr: Expr = operand(self)?;
        let mut links = 0;

        while let Some(op) = operator(&self.peek().token_type) {
            let line = self.advance().line;
            links += 1;
            self.check_chain(links)?;
            let right: Expr = operand(self)?;

            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                line,
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(Self::comparison, |tt| match tt {
            TokenType::EQUAL_EQUAL => Some(BinaryOp::Equal),
            TokenType::BANG_EQUAL => Some(BinaryOp::NotEqual),
            TokenType::EQUAL_EQUAL_EQUAL => Some(BinaryOp::StrictEqual),
            TokenType::BANG_EQUAL_EQUAL => Some(BinaryOp::StrictNotEqual),
            _ => None,
        })
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary_level(Self::term, |tt| match tt {
            TokenType::LESS => Some(BinaryOp::Less),
            TokenType::LESS_EQUAL => Some(BinaryOp::LessEqual),
            TokenType::GREATER => Some(BinaryOp::Greater),
            TokenType::GREATER_EQUAL => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(Self::factor, |tt| match tt {
            TokenType::PLUS => Some(BinaryOp::Add),
            TokenType::MINUS => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn factor(&mut self) -> Result<Expr> {
        self.binary_level(Self::unary, |tt| match tt {
            TokenType::STAR => Some(BinaryOp::Mul),
            TokenType::SLASH => Some(BinaryOp::Div),
            TokenType::PERCENT => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek().token_type {
            TokenType::BANG => Some(UnaryOp::Not),
            TokenType::MINUS => Some(UnaryOp::Negate),
            TokenType::PLUS => Some(UnaryOp::Plus),
            TokenType::TYPEOF => Some(UnaryOp::TypeOf),
            TokenType::DELETE => Some(UnaryOp::Delete),
            _ => None,
        };

        if let Some(op) = op {
            let line = self.advance().line;
            let operand = self.nested_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                line,
            });
        }

        if self.check(TokenType::PLUS_PLUS) || self.check(TokenType::MINUS_MINUS) {
            let tok = self.advance();
            let op = update_op(&tok.token_type);
            let target = self.nested_unary()?;
            return self.update(op, true, target, tok.line);
        }

        self.postfix()
    }

    fn nested_unary(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.unary());
        self.leave();
        result
    }

    fn postfix(&mut self) -> Result<Expr> {
        let expr = self.call()?;

        // A line break before `++`/`--` ends the expression.
        if (self.check(TokenType::PLUS_PLUS) || self.check(TokenType::MINUS_MINUS))
            && self.peek().line == self.previous().line
        {
            let tok = self.advance();
            return self.update(update_op(&tok.token_type), false, expr, tok.line);
        }

        Ok(expr)
    }

    fn update(&mut self, op: UpdateOp, prefix: bool, target: Expr, line: usize) -> Result<Expr> {
        if !matches!(target, Expr::Identifier(_) | Expr::Member { .. }) {
            return Err(EngineError::parse(
                line,
                "Invalid left-hand side expression in update operation",
            ));
        }

        Ok(Expr::Update {
            op,
            prefix,
            target: Box::new(target),
            line,
        })
    }

    fn call(&mut self) -> Result<Expr> {
        let mut expr: Expr = self.primary()?;
        let mut links = 0;

        loop {
            links += 1;
            self.check_chain(links)?;

            if self.matches(TokenType::LEFT_PAREN) {
                expr = self.finish_call(expr)?;
            } else if self.matches(TokenType::DOT) {
                let tok = self.advance();
                if tok.token_type != TokenType::IDENTIFIER && !tok.token_type.is_keyword() {
                    return Err(EngineError::parse(tok.line, "Expected property name after '.'"));
                }

                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberKey::Named(Rc::from(tok.lexeme)),
                    line: tok.line,
                };
            } else if self.matches(TokenType::LEFT_BRACKET) {
                let line = self.previous().line;
                let key = self.expression()?;
                self.consume(TokenType::RIGHT_BRACKET, "Expected ']' after computed property")?;

                expr = Expr::Member {
                    object: Box::new(expr),
                    property: MemberKey::Computed(Box::new(key)),
                    line,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr> {
        let mut arguments: Vec<Expr> = Vec::new();

        if !self.check(TokenType::RIGHT_PAREN) {
            loop {
                if arguments.len() >= MAX_PARAMETERS {
                    return Err(EngineError::parse(
                        self.peek().line,
                        "Cannot have more than 255 arguments",
                    ));
                }

                arguments.push(self.assignment()?);

                if !self.matches(TokenType::COMMA) {
                    break;
                }
            }
        }

        let paren: &Token<'_> =
            self.consume(TokenType::RIGHT_PAREN, "Expected ')' after arguments")?;

        let is_eval = matches!(&callee, Expr::Identifier(id) if &*id.name == "eval");

        Ok(Expr::Call {
            callee: Box::new(callee),
            arguments,
            site: EvalCallSite::new(is_eval),
            line: paren.line,
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.is_at_end() {
            return Err(EngineError::parse(self.peek().line, "Unexpected end of input"));
        }

        let tok = self.advance();

        let expr = match &tok.token_type {
            TokenType::FALSE => Expr::Literal(Literal::Bool(false)),
            TokenType::TRUE => Expr::Literal(Literal::Bool(true)),
            TokenType::NULL => Expr::Literal(Literal::Null),
            TokenType::NUMBER(n) => Expr::Literal(Literal::Number(*n)),
            TokenType::STRING(s) => Expr::Literal(Literal::Str(s.to_rope())),
            TokenType::THIS => Expr::This(tok.line),
            TokenType::IDENTIFIER => {
                Expr::Identifier(Identifier::new(Rc::from(tok.lexeme), tok.line))
            }
            TokenType::FUNCTION => Expr::Function(Rc::new(self.function(false)?)),
            TokenType::LEFT_BRACE => self.object_literal(tok.line)?,
            TokenType::LEFT_PAREN => {
                self.enter()?;
                let inner = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                    self.expression()
                });
                self.leave();
                let inner = inner?;
                self.consume(TokenType::RIGHT_PAREN, "Expected ')' after expression")?;
                inner
            }
            _ => {
                return Err(EngineError::parse(
                    tok.line,
                    format!("Unexpected token '{}'", tok.lexeme),
                ));
            }
        };

        Ok(expr)
    }

    fn object_literal(&mut self, line: usize) -> Result<Expr> {
        let mut properties: Vec<(Name, Expr)> = Vec::new();

        while !self.check(TokenType::RIGHT_BRACE) {
            let tok = self.advance();

            let key: Name = match &tok.token_type {
                TokenType::IDENTIFIER => Rc::from(tok.lexeme),
                TokenType::STRING(s) => Rc::from(s.to_string_lossy().as_str()),
                TokenType::NUMBER(n) => Rc::from(crate::value::number_to_string(*n).as_str()),
                tt if tt.is_keyword() => Rc::from(tok.lexeme),
                _ => return Err(EngineError::parse(tok.line, "Expected property name")),
            };

            let value = if self.matches(TokenType::COLON) {
                self.assignment()?
            } else if tok.token_type == TokenType::IDENTIFIER {
                Expr::Identifier(Identifier::new(key.clone(), tok.line))
            } else {
                return Err(EngineError::parse(tok.line, "Expected ':' after property name"));
            };

            properties.push((key, value));

            if !self.matches(TokenType::COMMA) {
                break;
            }
        }

        self.consume(TokenType::RIGHT_BRACE, "Expected '}' after object literal")?;

        Ok(Expr::Object { properties, line })
    }

    // ────────────────────── utility helpers ───────────────────────

    #[inline(always)]
    fn matches(&mut self, ttype: TokenType) -> bool {
        if self.check(ttype) {
            self.advance();

            return true;
        }

        false
    }

    #[inline(always)]
    fn consume(&mut self, ttype: TokenType, message: &str) -> Result<&'a Token<'a>> {
        if self.check(ttype) {
            return Ok(self.advance());
        }

        Err(EngineError::parse(self.peek().line, message))
    }

    /// `;`, or an inserted one before `}`, at EOF, or after a line break.
    fn consume_semicolon(&mut self, message: &str) -> Result<()> {
        if self.matches(TokenType::SEMICOLON)
            || self.check(TokenType::RIGHT_BRACE)
            || self.is_at_end()
            || self.peek().line > self.previous().line
        {
            return Ok(());
        }

        Err(EngineError::parse(self.peek().line, message))
    }

    #[inline(always)]
    fn check(&self, ttype: TokenType) -> bool {
        if self.is_at_end() {
            return ttype == TokenType::EOF;
        }

        self.peek().token_type == ttype
    }

    fn peek_next_is(&self, ttype: TokenType) -> bool {
        self.tokens
            .get(self.current + 1)
            .is_some_and(|t| t.token_type == ttype)
    }

    #[inline(always)]
    fn advance(&mut self) -> &'a Token<'a> {
        if !self.is_at_end() {
            self.current += 1;
        }

        self.previous()
    }

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::EOF)
    }

    #[inline(always)]
    fn peek(&self) -> &'a Token<'a> {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    #[inline(always)]
    fn previous(&self) -> &'a Token<'a> {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

fn update_op(tt: &TokenType) -> UpdateOp {
    if *tt == TokenType::PLUS_PLUS {
        UpdateOp::Increment
    } else {
        UpdateOp::Decrement
    }
}

fn new_function(
    name: Option<Name>,
    params: Vec<Identifier>,
    body: Vec<Stmt>,
    is_arrow: bool,
    is_declaration: bool,
    line: usize,
) -> FunctionDecl {
    let has_use_strict = has_use_strict(&body);

    FunctionDecl {
        name,
        params,
        body,
        is_arrow,
        is_declaration,
        has_use_strict,
        line,
        strict: Cell::new(has_use_strict),
        layout: OnceCell::new(),
    }
}

/// Scans the directive prologue for `"use strict"`.
fn has_use_strict(body: &[Stmt]) -> bool {
    for stmt in body {
        match stmt {
            Stmt::Expression(Expr::Literal(Literal::Str(s))) => {
                if s.to_string_lossy() == "use strict" {
                    return true;
                }
            }
            _ => return false,
        }
    }

    false
}
