use logos::Logos;
use std::ops::Range;

use crate::lexers::datalog::DatalogToken;
use crate::models::datalog::{
    AggregateOp, Argument, Atom, Attribute, BinaryOp, Clause, ConstraintOp, Literal, Program,
    RecordTypeDecl, RelationDecl, SrcLocation, TernaryOp, UnaryOp,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error {location}: {message}")]
pub struct ParseError {
    pub message: String,
    pub location: SrcLocation,
}

type Result<T> = std::result::Result<T, ParseError>;

pub fn parse_program(source: &str) -> Result<Program> {
    Parser::new(source)?.program()
}

/// Parses a single fact or rule; the trailing period is optional, which
/// keeps inline test fixtures short.
pub fn parse_clause(source: &str) -> Result<Clause> {
    let mut parser = Parser::new(source)?;
    let clause = parser.clause()?;
    if !parser.at_end() {
        return Err(parser.error_here("trailing input after clause"));
    }
    Ok(clause)
}

const AGGREGATE_NAMES: [&str; 4] = ["min", "max", "count", "sum"];

fn is_functor_name(name: &str) -> bool {
    UnaryOp::from_name(name).is_some()
        || BinaryOp::from_name(name).is_some()
        || name == "substr"
        || AGGREGATE_NAMES.contains(&name)
}

fn infix_ident_op(name: &str) -> Option<(BinaryOp, u8)> {
    match name {
        "lor" => Some((BinaryOp::Lor, 1)),
        "land" => Some((BinaryOp::Land, 2)),
        "bor" => Some((BinaryOp::Bor, 3)),
        "bxor" => Some((BinaryOp::Bxor, 4)),
        "band" => Some((BinaryOp::Band, 5)),
        _ => None,
    }
}

struct Parser<'a> {
    tokens: Vec<(DatalogToken<'a>, Range<usize>)>,
    pos: usize,
    line_starts: Vec<usize>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Result<Self> {
        let mut line_starts = vec![0];
        for (offset, character) in source.char_indices() {
            if character == '\n' {
                line_starts.push(offset + 1);
            }
        }

        let mut tokens = vec![];
        let mut lexer = DatalogToken::lexer(source);
        while let Some(token) = lexer.next() {
            let span = lexer.span();
            if token == DatalogToken::Error {
                return Err(ParseError {
                    message: format!("unexpected character {:?}", lexer.slice()),
                    location: location_of(&line_starts, span.start),
                });
            }
            tokens.push((token, span));
        }

        Ok(Self {
            tokens,
            pos: 0,
            line_starts,
        })
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&DatalogToken<'a>> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&DatalogToken<'a>> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<DatalogToken<'a>> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        self.pos += 1;
        token
    }

    fn here(&self) -> SrcLocation {
        let offset = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, span)| span.start)
            .unwrap_or(0);
        location_of(&self.line_starts, offset)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            location: self.here(),
        }
    }

    fn expect(&mut self, expected: DatalogToken<'a>, what: &str) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error_here(format!("expected {}", what)))
            }
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<&'a str> {
        match self.next() {
            Some(DatalogToken::Ident(name)) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error_here(format!("expected {}", what)))
            }
        }
    }

    fn program(&mut self) -> Result<Program> {
        let mut program = Program::default();

        while !self.at_end() {
            match self.peek() {
                Some(DatalogToken::Type) => {
                    self.next();
                    program.types.push(self.type_decl()?);
                }
                Some(DatalogToken::Decl) => {
                    self.next();
                    program.relations.push(self.relation_decl()?);
                }
                Some(DatalogToken::Input) => {
                    self.next();
                    let (name, options) = self.io_directive()?;
                    self.apply_io(&mut program, &name, options, true)?;
                }
                Some(DatalogToken::Output) => {
                    self.next();
                    let (name, options) = self.io_directive()?;
                    self.apply_io(&mut program, &name, options, false)?;
                }
                Some(DatalogToken::Pragma) => {
                    self.next();
                    let key = self.string_value("pragma key")?;
                    let value = self.string_value("pragma value")?;
                    program.pragmas.push((key, value));
                }
                Some(DatalogToken::Plan) => {
                    self.next();
                    let plan = self.plan_positions()?;
                    match program.clauses.last_mut() {
                        Some(clause) => clause.plan = Some(plan),
                        None => return Err(self.error_here("plan without a preceding rule")),
                    }
                }
                _ => {
                    let clause = self.clause()?;
                    program.clauses.push(clause);
                }
            }
        }

        Ok(program)
    }

    fn string_value(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(DatalogToken::Str(value)) => Ok(value),
            Some(DatalogToken::Ident(value)) => Ok(value.to_string()),
            Some(DatalogToken::Number(value)) => Ok(value.to_string()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error_here(format!("expected {}", what)))
            }
        }
    }

    fn attributes(&mut self, terminator: DatalogToken<'a>, what: &str) -> Result<Vec<Attribute>> {
        let mut attributes = vec![];
        if self.peek() == Some(&terminator) {
            self.next();
            return Ok(attributes);
        }
        loop {
            let name = self.expect_ident("attribute name")?;
            self.expect(DatalogToken::Colon, ":")?;
            let type_name = self.expect_ident("attribute type")?;
            attributes.push(Attribute {
                name: name.to_string(),
                type_name: type_name.to_string(),
            });
            match self.next() {
                Some(DatalogToken::Comma) => continue,
                Some(token) if token == terminator => break,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error_here(format!("expected , or {}", what)));
                }
            }
        }
        Ok(attributes)
    }

    fn type_decl(&mut self) -> Result<RecordTypeDecl> {
        let location = self.here();
        let name = self.expect_ident("type name")?;
        self.expect(DatalogToken::Eq, "=")?;
        self.expect(DatalogToken::LBracket, "[")?;
        let fields = self.attributes(DatalogToken::RBracket, "]")?;
        Ok(RecordTypeDecl {
            name: name.to_string(),
            fields,
            location,
        })
    }

    fn relation_decl(&mut self) -> Result<RelationDecl> {
        let location = self.here();
        let name = self.expect_ident("relation name")?;
        self.expect(DatalogToken::LParen, "(")?;
        let attributes = self.attributes(DatalogToken::RParen, ")")?;

        let mut decl = RelationDecl::new(name, attributes);
        decl.location = location;
        while let Some(DatalogToken::Ident(qualifier)) = self.peek() {
            match *qualifier {
                "eqrel" => decl.is_equivalence = true,
                "inline" => decl.is_inline = true,
                "input" => decl.is_input = true,
                "output" => decl.is_output = true,
                _ => break,
            }
            self.next();
        }
        Ok(decl)
    }

    fn io_directive(&mut self) -> Result<(String, Vec<(String, String)>)> {
        let name = self.expect_ident("relation name")?;
        let mut options = vec![];
        if self.peek() == Some(&DatalogToken::LParen) {
            self.next();
            if self.peek() == Some(&DatalogToken::RParen) {
                self.next();
                return Ok((name.to_string(), options));
            }
            loop {
                let key = self.expect_ident("option name")?;
                self.expect(DatalogToken::Eq, "=")?;
                let value = self.string_value("option value")?;
                options.push((key.to_string(), value));
                match self.next() {
                    Some(DatalogToken::Comma) => continue,
                    Some(DatalogToken::RParen) => break,
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error_here("expected , or )"));
                    }
                }
            }
        }
        Ok((name.to_string(), options))
    }

    fn apply_io(
        &self,
        program: &mut Program,
        name: &str,
        options: Vec<(String, String)>,
        input: bool,
    ) -> Result<()> {
        match program.relations.iter_mut().find(|decl| decl.name == name) {
            Some(decl) => {
                if input {
                    decl.is_input = true;
                    decl.input_options = options;
                } else {
                    decl.is_output = true;
                    decl.output_options = options;
                }
                Ok(())
            }
            None => Err(ParseError {
                message: format!("directive for undeclared relation {}", name),
                location: self.here(),
            }),
        }
    }

    fn plan_positions(&mut self) -> Result<Vec<usize>> {
        self.expect(DatalogToken::LParen, "(")?;
        let mut positions = vec![];
        loop {
            match self.next() {
                Some(DatalogToken::Number(position)) if position > 0 => {
                    positions.push(position as usize)
                }
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error_here("expected atom position"));
                }
            }
            match self.next() {
                Some(DatalogToken::Comma) => continue,
                Some(DatalogToken::RParen) => break,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error_here("expected , or )"));
                }
            }
        }
        Ok(positions)
    }

    fn clause(&mut self) -> Result<Clause> {
        let location = self.here();
        let head = self.atom()?;

        match self.peek() {
            Some(DatalogToken::Dot) => {
                self.next();
                let mut clause = Clause::fact(head);
                clause.location = location;
                Ok(clause)
            }
            Some(DatalogToken::If) => {
                self.next();
                let mut body = vec![self.literal()?];
                while self.peek() == Some(&DatalogToken::Comma) {
                    self.next();
                    body.push(self.literal()?);
                }
                if self.peek() == Some(&DatalogToken::Dot) {
                    self.next();
                } else if !self.at_end() {
                    return Err(self.error_here("expected . at end of rule"));
                }
                let mut clause = Clause::rule(head, body);
                clause.location = location;
                Ok(clause)
            }
            None => {
                let mut clause = Clause::fact(head);
                clause.location = location;
                Ok(clause)
            }
            _ => Err(self.error_here("expected :- or .")),
        }
    }

    fn atom(&mut self) -> Result<Atom> {
        let location = self.here();
        let name = self.expect_ident("relation name")?;
        self.expect(DatalogToken::LParen, "(")?;
        let mut args = vec![];
        if self.peek() == Some(&DatalogToken::RParen) {
            self.next();
        } else {
            loop {
                args.push(self.expression()?);
                match self.next() {
                    Some(DatalogToken::Comma) => continue,
                    Some(DatalogToken::RParen) => break,
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        return Err(self.error_here("expected , or )"));
                    }
                }
            }
        }
        Ok(Atom {
            name: name.to_string(),
            args,
            location,
        })
    }

    fn literal(&mut self) -> Result<Literal> {
        let location = self.here();
        match self.peek() {
            Some(DatalogToken::Ident("true")) if self.peek_at(1) != Some(&DatalogToken::LParen) => {
                self.next();
                return Ok(Literal::BooleanConstraint {
                    value: true,
                    location,
                });
            }
            Some(DatalogToken::Ident("false")) if self.peek_at(1) != Some(&DatalogToken::LParen) => {
                self.next();
                return Ok(Literal::BooleanConstraint {
                    value: false,
                    location,
                });
            }
            Some(DatalogToken::Bang) => {
                self.next();
                match self.peek() {
                    Some(DatalogToken::Ident("match")) => {
                        self.next();
                        let (lhs, rhs) = self.functor_pair()?;
                        return Ok(Literal::BinaryConstraint {
                            op: ConstraintOp::NotMatch,
                            lhs,
                            rhs,
                            location,
                        });
                    }
                    Some(DatalogToken::Ident("contains")) => {
                        self.next();
                        let (lhs, rhs) = self.functor_pair()?;
                        return Ok(Literal::BinaryConstraint {
                            op: ConstraintOp::NotContains,
                            lhs,
                            rhs,
                            location,
                        });
                    }
                    _ => return Ok(Literal::Negation(self.atom()?)),
                }
            }
            Some(DatalogToken::Ident("match"))
                if self.peek_at(1) == Some(&DatalogToken::LParen) =>
            {
                self.next();
                let (lhs, rhs) = self.functor_pair()?;
                return Ok(Literal::BinaryConstraint {
                    op: ConstraintOp::Match,
                    lhs,
                    rhs,
                    location,
                });
            }
            Some(DatalogToken::Ident("contains"))
                if self.peek_at(1) == Some(&DatalogToken::LParen) =>
            {
                self.next();
                let (lhs, rhs) = self.functor_pair()?;
                return Ok(Literal::BinaryConstraint {
                    op: ConstraintOp::Contains,
                    lhs,
                    rhs,
                    location,
                });
            }
            Some(DatalogToken::Ident(name))
                if self.peek_at(1) == Some(&DatalogToken::LParen) && !is_functor_name(name) =>
            {
                return Ok(Literal::Atom(self.atom()?));
            }
            _ => {}
        }

        // Everything else is a comparison between two expressions.
        let lhs = self.expression()?;
        let op = match self.next() {
            Some(DatalogToken::Eq) => ConstraintOp::Eq,
            Some(DatalogToken::Ne) => ConstraintOp::Ne,
            Some(DatalogToken::Lt) => ConstraintOp::Lt,
            Some(DatalogToken::Le) => ConstraintOp::Le,
            Some(DatalogToken::Gt) => ConstraintOp::Gt,
            Some(DatalogToken::Ge) => ConstraintOp::Ge,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error_here("expected comparison operator"));
            }
        };
        let rhs = self.expression()?;
        Ok(Literal::BinaryConstraint {
            op,
            lhs,
            rhs,
            location,
        })
    }

    fn functor_pair(&mut self) -> Result<(Argument, Argument)> {
        self.expect(DatalogToken::LParen, "(")?;
        let lhs = self.expression()?;
        self.expect(DatalogToken::Comma, ",")?;
        let rhs = self.expression()?;
        self.expect(DatalogToken::RParen, ")")?;
        Ok((lhs, rhs))
    }

    fn expression(&mut self) -> Result<Argument> {
        self.binary_expression(0)
    }

    fn binary_expression(&mut self, min_power: u8) -> Result<Argument> {
        let mut lhs = self.unary_expression()?;

        loop {
            let (op, power, right_assoc) = match self.peek() {
                Some(DatalogToken::Plus) => (BinaryOp::Add, 6, false),
                Some(DatalogToken::Minus) => (BinaryOp::Sub, 6, false),
                Some(DatalogToken::Star) => (BinaryOp::Mul, 7, false),
                Some(DatalogToken::Slash) => (BinaryOp::Div, 7, false),
                Some(DatalogToken::Percent) => (BinaryOp::Mod, 7, false),
                Some(DatalogToken::Caret) => (BinaryOp::Pow, 8, true),
                Some(DatalogToken::Ident(name)) => match infix_ident_op(name) {
                    Some((op, power)) => (op, power, false),
                    None => break,
                },
                _ => break,
            };
            if power < min_power {
                break;
            }
            self.next();
            let rhs = self.binary_expression(if right_assoc { power } else { power + 1 })?;
            lhs = Argument::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn unary_expression(&mut self) -> Result<Argument> {
        if self.peek() == Some(&DatalogToken::Minus) {
            self.next();
            // Fold negation into number literals directly.
            if let Some(DatalogToken::Number(value)) = self.peek() {
                let value = *value;
                self.next();
                return Ok(Argument::NumberConstant(-value));
            }
            let arg = self.unary_expression()?;
            return Ok(Argument::UnaryOp {
                op: UnaryOp::Neg,
                arg: Box::new(arg),
            });
        }
        self.primary_expression()
    }

    fn primary_expression(&mut self) -> Result<Argument> {
        match self.next() {
            Some(DatalogToken::Number(value)) => Ok(Argument::NumberConstant(value)),
            Some(DatalogToken::Str(value)) => Ok(Argument::SymbolConstant(value)),
            Some(DatalogToken::Dollar) => Ok(Argument::Counter),
            Some(DatalogToken::LParen) => {
                let inner = self.expression()?;
                self.expect(DatalogToken::RParen, ")")?;
                Ok(inner)
            }
            Some(DatalogToken::LBracket) => {
                let mut fields = vec![];
                if self.peek() == Some(&DatalogToken::RBracket) {
                    self.next();
                } else {
                    loop {
                        fields.push(self.expression()?);
                        match self.next() {
                            Some(DatalogToken::Comma) => continue,
                            Some(DatalogToken::RBracket) => break,
                            _ => {
                                self.pos = self.pos.saturating_sub(1);
                                return Err(self.error_here("expected , or ]"));
                            }
                        }
                    }
                }
                Ok(Argument::RecordInit { fields })
            }
            Some(DatalogToken::Ident(name)) => self.ident_expression(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error_here("expected expression"))
            }
        }
    }

    fn ident_expression(&mut self, name: &'a str) -> Result<Argument> {
        if name == "nil" {
            return Ok(Argument::NullConstant);
        }
        if name == "_" {
            return Ok(Argument::UnnamedVariable);
        }

        let applied = self.peek() == Some(&DatalogToken::LParen);

        if let Some(op) = UnaryOp::from_name(name) {
            if applied {
                self.expect(DatalogToken::LParen, "(")?;
                let arg = self.expression()?;
                self.expect(DatalogToken::RParen, ")")?;
                return Ok(Argument::UnaryOp {
                    op,
                    arg: Box::new(arg),
                });
            }
        }

        if name == "cat" && applied {
            let (lhs, rhs) = self.functor_pair()?;
            return Ok(Argument::BinaryOp {
                op: BinaryOp::Cat,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }

        if name == "substr" && applied {
            self.expect(DatalogToken::LParen, "(")?;
            let first = self.expression()?;
            self.expect(DatalogToken::Comma, ",")?;
            let second = self.expression()?;
            self.expect(DatalogToken::Comma, ",")?;
            let third = self.expression()?;
            self.expect(DatalogToken::RParen, ")")?;
            return Ok(Argument::TernaryOp {
                op: TernaryOp::Substr,
                args: Box::new([first, second, third]),
            });
        }

        if (name == "min" || name == "max") && applied {
            let (lhs, rhs) = self.functor_pair()?;
            let op = if name == "min" {
                BinaryOp::Min
            } else {
                BinaryOp::Max
            };
            return Ok(Argument::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }

        if AGGREGATE_NAMES.contains(&name) {
            let op = match name {
                "min" => AggregateOp::Min,
                "max" => AggregateOp::Max,
                "count" => AggregateOp::Count,
                _ => AggregateOp::Sum,
            };
            let target = if self.peek() == Some(&DatalogToken::Colon) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect(DatalogToken::Colon, ":")?;
            let atom = self.atom()?;
            return Ok(Argument::Aggregate {
                op,
                target,
                atom: Box::new(atom),
            });
        }

        if applied {
            return Err(self.error_here(format!("unknown functor {}", name)));
        }

        Ok(Argument::Variable(name.to_string()))
    }
}

fn location_of(line_starts: &[usize], offset: usize) -> SrcLocation {
    let line = line_starts.partition_point(|start| *start <= offset);
    SrcLocation {
        line,
        column: offset - line_starts[line - 1] + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_clause, parse_program};
    use crate::models::datalog::{
        AggregateOp, Argument, Atom, BinaryOp, Clause, ConstraintOp, Literal, UnaryOp,
    };

    #[test]
    fn test_parse_fact_and_rule() {
        let fact = parse_clause("E(1, 2).").unwrap();
        assert!(fact.is_fact());
        assert_eq!(
            fact.head,
            Atom {
                name: "E".to_string(),
                args: vec![Argument::NumberConstant(1), Argument::NumberConstant(2)],
                location: fact.head.location,
            }
        );

        let rule = parse_clause("T(x, z) :- T(x, y), E(y, z).").unwrap();
        assert_eq!(rule.body.len(), 2);
        assert!(matches!(rule.body[0], Literal::Atom(_)));
    }

    #[test]
    fn test_parse_negation_and_constraints() {
        let rule = parse_clause("Q(x) :- P(x), !R(x), x < 10.").unwrap();

        assert!(matches!(rule.body[1], Literal::Negation(_)));
        match &rule.body[2] {
            Literal::BinaryConstraint { op, lhs, rhs, .. } => {
                assert_eq!(*op, ConstraintOp::Lt);
                assert_eq!(*lhs, Argument::Variable("x".to_string()));
                assert_eq!(*rhs, Argument::NumberConstant(10));
            }
            other => panic!("expected constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_functors() {
        let rule = parse_clause("r_bnot(bnot(x), x) :- A(x).").unwrap();

        assert_eq!(
            rule.head.args[0],
            Argument::UnaryOp {
                op: UnaryOp::Bnot,
                arg: Box::new(Argument::Variable("x".to_string())),
            }
        );
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let rule = parse_clause("A(y) :- B(x), y = x + 2 * 3.").unwrap();

        match &rule.body[1] {
            Literal::BinaryConstraint { rhs, .. } => assert_eq!(
                *rhs,
                Argument::BinaryOp {
                    op: BinaryOp::Add,
                    lhs: Box::new(Argument::Variable("x".to_string())),
                    rhs: Box::new(Argument::BinaryOp {
                        op: BinaryOp::Mul,
                        lhs: Box::new(Argument::NumberConstant(2)),
                        rhs: Box::new(Argument::NumberConstant(3)),
                    }),
                }
            ),
            other => panic!("expected constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_aggregate() {
        let rule = parse_clause("N(n) :- n = count : R(_).").unwrap();

        match &rule.body[0] {
            Literal::BinaryConstraint { op, rhs, .. } => {
                assert_eq!(*op, ConstraintOp::Eq);
                match rhs {
                    Argument::Aggregate { op, target, atom } => {
                        assert_eq!(*op, AggregateOp::Count);
                        assert!(target.is_none());
                        assert_eq!(atom.name, "R");
                    }
                    other => panic!("expected aggregate, got {:?}", other),
                }
            }
            other => panic!("expected constraint, got {:?}", other),
        }

        let with_target = parse_clause("M(m) :- m = max y : R(y).").unwrap();
        match &with_target.body[0] {
            Literal::BinaryConstraint { rhs, .. } => {
                assert!(matches!(rhs, Argument::Aggregate { target: Some(_), .. }));
            }
            other => panic!("expected constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_min_is_functor_with_parens_and_aggregate_otherwise() {
        let functor = parse_clause("A(m) :- B(x, y), m = min(x, y).").unwrap();
        match &functor.body[1] {
            Literal::BinaryConstraint { rhs, .. } => {
                assert!(matches!(
                    rhs,
                    Argument::BinaryOp {
                        op: BinaryOp::Min,
                        ..
                    }
                ));
            }
            other => panic!("expected constraint, got {:?}", other),
        }

        let aggregate = parse_clause("A(m) :- m = min x : B(x, _).").unwrap();
        match &aggregate.body[0] {
            Literal::BinaryConstraint { rhs, .. } => {
                assert!(matches!(rhs, Argument::Aggregate { .. }));
            }
            other => panic!("expected constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_records_and_wildcards() {
        let rule = parse_clause("A(x) :- R([x, _], nil).").unwrap();

        match &rule.body[0] {
            Literal::Atom(atom) => {
                assert_eq!(
                    atom.args[0],
                    Argument::RecordInit {
                        fields: vec![
                            Argument::Variable("x".to_string()),
                            Argument::UnnamedVariable,
                        ],
                    }
                );
                assert_eq!(atom.args[1], Argument::NullConstant);
            }
            other => panic!("expected atom, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_match_constraint() {
        let rule = parse_clause(r#"A(x) :- S(x), match("a.*", x)."#).unwrap();

        match &rule.body[1] {
            Literal::BinaryConstraint { op, lhs, .. } => {
                assert_eq!(*op, ConstraintOp::Match);
                assert_eq!(*lhs, Argument::SymbolConstant("a.*".to_string()));
            }
            other => panic!("expected constraint, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_program_with_declarations() {
        let program = parse_program(
            r#"
            .type P = [x: number, y: number]
            .decl E(a: number, b: number)
            .decl T(a: number, b: number)
            .input E(filename = "edges.facts", delimiter = ",")
            .output T
            .pragma "jobs" "4"
            E(1, 2).
            T(x, y) :- E(x, y).
            T(x, z) :- T(x, y), E(y, z).
            .plan (2, 1)
            "#,
        )
        .unwrap();

        assert_eq!(program.types.len(), 1);
        assert_eq!(program.relations.len(), 2);
        assert_eq!(program.clauses.len(), 3);
        assert_eq!(program.pragmas, vec![("jobs".to_string(), "4".to_string())]);

        let e = &program.relations[0];
        assert!(e.is_input);
        assert_eq!(
            e.input_options,
            vec![
                ("filename".to_string(), "edges.facts".to_string()),
                ("delimiter".to_string(), ",".to_string()),
            ]
        );

        assert_eq!(program.clauses[2].plan, Some(vec![2, 1]));
    }

    #[test]
    fn test_parse_eqrel_qualifier() {
        let program = parse_program(".decl EQ(a: number, b: number) eqrel").unwrap();

        assert!(program.relations[0].is_equivalence);
    }

    #[test]
    fn test_locations_point_at_lines() {
        let program = parse_program(".decl A(x: number)\nA(x) :- A(x), Missing(x).").unwrap();

        let clause = &program.clauses[0];
        assert_eq!(clause.location.line, 2);
        assert_eq!(clause.body[1].location().line, 2);
    }

    #[test]
    fn test_parse_error_reports_location() {
        let error = parse_program(".decl A(x incomplete").unwrap_err();

        assert!(error.message.contains("expected"));
        assert_eq!(error.location.line, 1);
    }

    #[test]
    fn test_negative_numbers_fold() {
        let fact = parse_clause("A(-5).").unwrap();

        assert_eq!(fact.head.args[0], Argument::NumberConstant(-5));
    }

    #[test]
    fn test_clause_from_str_round_trip() {
        let source = "T(x, z) :- T(x, y), E(y, z).";
        let clause = Clause::from(source);

        assert_eq!(clause.to_string(), source);
    }
}
