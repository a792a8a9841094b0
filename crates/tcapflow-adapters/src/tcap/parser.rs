//! TCAP parser.

use tcapflow_common::types::TupleSpec;
use tcapflow_common::utils::error::{Error, ParseError, Result};

use super::ast::{AtomicComputation, AtomicComputationList, AtomicOp};
use super::lexer::{Lexer, Token, TokenKind};

/// TCAP parser.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given input.
    ///
    /// # Errors
    ///
    /// Fails if the first token is malformed.
    pub fn new(input: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parses the whole input into a validated program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed text, and the resolution errors
    /// of [`AtomicComputationList::new`] for dangling references.
    pub fn parse(&mut self) -> Result<AtomicComputationList> {
        let mut computations = Vec::new();
        while self.current.kind != TokenKind::Eof {
            computations.push(self.parse_statement()?);
            while self.current.kind == TokenKind::Semicolon {
                self.advance()?;
            }
        }
        tracing::debug!("parsed {} atomic computations", computations.len());
        AtomicComputationList::new(computations)
    }

    fn parse_statement(&mut self) -> Result<AtomicComputation> {
        let (line, column) = (self.current.line, self.current.column);
        let output = self.parse_tuple_spec()?;
        self.expect(&TokenKind::Arrow)?;
        let keyword = self.parse_ident()?;
        self.expect(&TokenKind::LParen)?;

        let computation = match keyword.as_str() {
            "SCAN" => {
                let set = self.parse_string()?;
                self.expect(&TokenKind::Comma)?;
                let db = self.parse_string()?;
                self.expect(&TokenKind::Comma)?;
                let computation_name = self.parse_string()?;
                AtomicComputation {
                    output,
                    input: TupleSpec::empty(),
                    projection: TupleSpec::empty(),
                    computation_name,
                    op: AtomicOp::Scan { db, set },
                }
            }
            "APPLY" | "HASHLEFT" | "HASHRIGHT" => {
                let (input, projection) = self.parse_input_and_projection()?;
                let computation_name = self.parse_string()?;
                self.expect(&TokenKind::Comma)?;
                let lambda = self.parse_string()?;
                let op = match keyword.as_str() {
                    "APPLY" => AtomicOp::Apply { lambda },
                    "HASHLEFT" => AtomicOp::HashLeft { lambda },
                    _ => AtomicOp::HashRight { lambda },
                };
                AtomicComputation {
                    output,
                    input,
                    projection,
                    computation_name,
                    op,
                }
            }
            "FILTER" | "HASHONE" | "FLATTEN" => {
                let (input, projection) = self.parse_input_and_projection()?;
                let computation_name = self.parse_string()?;
                let op = match keyword.as_str() {
                    "FILTER" => AtomicOp::Filter,
                    "HASHONE" => AtomicOp::HashOne,
                    _ => AtomicOp::Flatten,
                };
                AtomicComputation {
                    output,
                    input,
                    projection,
                    computation_name,
                    op,
                }
            }
            "JOIN" => {
                let (input, projection) = self.parse_input_and_projection()?;
                let (right_input, right_projection) = self.parse_input_and_projection()?;
                let computation_name = self.parse_string()?;
                AtomicComputation {
                    output,
                    input,
                    projection,
                    computation_name,
                    op: AtomicOp::Join {
                        right_input,
                        right_projection,
                    },
                }
            }
            "AGGREGATE" => {
                let input = self.parse_tuple_spec()?;
                self.expect(&TokenKind::Comma)?;
                let computation_name = self.parse_string()?;
                AtomicComputation {
                    output,
                    input,
                    projection: TupleSpec::empty(),
                    computation_name,
                    op: AtomicOp::Aggregate,
                }
            }
            "OUTPUT" => {
                let input = self.parse_tuple_spec()?;
                self.expect(&TokenKind::Comma)?;
                let set = self.parse_string()?;
                self.expect(&TokenKind::Comma)?;
                let db = self.parse_string()?;
                self.expect(&TokenKind::Comma)?;
                let computation_name = self.parse_string()?;
                AtomicComputation {
                    output,
                    input,
                    projection: TupleSpec::empty(),
                    computation_name,
                    op: AtomicOp::Output { db, set },
                }
            }
            other => {
                return Err(
                    ParseError::new(line, column, format!("unknown operator '{other}'")).into(),
                );
            }
        };
        self.expect(&TokenKind::RParen)?;

        check_shape(&computation).map_err(|message| ParseError::new(line, column, message))?;
        Ok(computation)
    }

    /// Parses `In(cols), In(cols),` and checks both specs name the same set.
    fn parse_input_and_projection(&mut self) -> Result<(TupleSpec, TupleSpec)> {
        let (line, column) = (self.current.line, self.current.column);
        let input = self.parse_tuple_spec()?;
        self.expect(&TokenKind::Comma)?;
        let projection = self.parse_tuple_spec()?;
        self.expect(&TokenKind::Comma)?;
        if !input.same_set(&projection) {
            return Err(ParseError::new(
                line,
                column,
                format!(
                    "projection reads '{}' but the input reads '{}'",
                    projection.set_name(),
                    input.set_name()
                ),
            )
            .into());
        }
        Ok((input, projection))
    }

    fn parse_tuple_spec(&mut self) -> Result<TupleSpec> {
        let name = self.parse_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut atts = Vec::new();
        if self.current.kind != TokenKind::RParen {
            atts.push(self.parse_ident()?);
            while self.current.kind == TokenKind::Comma {
                self.advance()?;
                atts.push(self.parse_ident()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(TupleSpec::new(name, atts))
    }

    fn parse_ident(&mut self) -> Result<String> {
        if let TokenKind::Ident(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error(&format!("expected identifier, found {}", self.current.kind)))
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        if let TokenKind::Str(value) = &self.current.kind {
            let value = value.clone();
            self.advance()?;
            Ok(value)
        } else {
            Err(self.error(&format!("expected quoted string, found {}", self.current.kind)))
        }
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if &self.current.kind == kind {
            self.advance()
        } else {
            Err(self.error(&format!("expected {kind}, found {}", self.current.kind)))
        }
    }

    fn error(&self, message: &str) -> Error {
        ParseError::new(self.current.line, self.current.column, message).into()
    }
}

/// Checks the column counts each operator implies.
fn check_shape(c: &AtomicComputation) -> std::result::Result<(), String> {
    let out = c.output.atts().len();
    let kept = c.projection.atts().len();
    let input = c.input.atts().len();
    let keyword = c.op.keyword();

    let expected_out = match &c.op {
        AtomicOp::Scan { .. } => 1,
        AtomicOp::Apply { .. } => kept + 1,
        AtomicOp::Filter => {
            if input != 1 {
                return Err(format!("{keyword} reads one boolean column, found {input}"));
            }
            kept
        }
        AtomicOp::HashLeft { .. }
        | AtomicOp::HashRight { .. }
        | AtomicOp::HashOne
        | AtomicOp::Flatten => {
            if input != 1 {
                return Err(format!("{keyword} reads one column, found {input}"));
            }
            kept + 1
        }
        AtomicOp::Join {
            right_input,
            right_projection,
        } => {
            if input != 1 || right_input.atts().len() != 1 {
                return Err("JOIN reads one hash column from each side".to_string());
            }
            if !right_input.same_set(right_projection) {
                return Err(format!(
                    "right projection reads '{}' but the right input reads '{}'",
                    right_projection.set_name(),
                    right_input.set_name()
                ));
            }
            kept + right_projection.atts().len()
        }
        AtomicOp::Aggregate => {
            if input != 3 {
                return Err(format!("AGGREGATE reads (key, value, hash), found {input} columns"));
            }
            1
        }
        AtomicOp::Output { .. } => 0,
    };
    if out == expected_out {
        Ok(())
    } else {
        Err(format!(
            "{keyword} output '{}' declares {out} columns, expected {expected_out}",
            c.output.set_name()
        ))
    }
}

/// Parses TCAP text into a validated program.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse_tcap(input: &str) -> Result<AtomicComputationList> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_A: &str = "
        A(a) <= SCAN('input', 'db', 'ScanUserSet_0')
        B(a, b) <= APPLY(A(a), A(a), 'SelectionComp_1', 'f')
        OUT() <= OUTPUT(B(b), 'output', 'db', 'Output_2')
    ";

    #[test]
    fn test_parse_linear_chain() {
        let list = parse_tcap(SCENARIO_A).unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.get(0).unwrap().is_scan());
        assert_eq!(list.consumers("A")[0].output_name(), "B");
        assert_eq!(list.consumers("B")[0].output_name(), "OUT");
        assert_eq!(
            list.get(1).unwrap().op,
            AtomicOp::Apply {
                lambda: "f".into()
            }
        );
    }

    #[test]
    fn test_parse_join_and_aggregate() {
        let text = "
            L(k, v) <= SCAN('l', 'db', 'ScanUserSet_0');
            R(k, w) <= SCAN('r', 'db', 'ScanUserSet_1');
            LH(v, h) <= HASHLEFT(L(k), L(v), 'JoinComp_2', '==_2');
            RH(w, h) <= HASHRIGHT(R(k), R(w), 'JoinComp_2', '==_2');
            J(v, w) <= JOIN(LH(h), LH(v), RH(h), RH(w), 'JoinComp_2');
            K(v, w, key) <= APPLY(J(v), J(v, w), 'AggregationComp_3', 'key_3');
            KH(key, w, hash) <= HASHONE(K(key), K(key, w), 'AggregationComp_3');
            AGG(agg) <= AGGREGATE(KH(key, w, hash), 'AggregationComp_3')
        ";
        let list = parse_tcap(text).unwrap();
        assert_eq!(list.len(), 8);
        let join = list.producer("J").unwrap();
        let AtomicOp::Join { right_input, .. } = &join.op else {
            panic!("expected a join");
        };
        assert_eq!(right_input.set_name(), "RH");
        assert_eq!(list.consumers("RH")[0].output_name(), "J");
        assert_eq!(list.producer("AGG").unwrap().op, AtomicOp::Aggregate);
    }

    #[test]
    fn test_display_round_trips() {
        let list = parse_tcap(SCENARIO_A).unwrap();
        let reparsed = parse_tcap(&list.to_string()).unwrap();
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            reparsed.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = parse_tcap("A(a) <= SCAN('s', 'db', 'C')\nB(a) <= BOGUS(A(a))").unwrap_err();
        let Error::Parse(parse) = err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert_eq!(parse.line, 2);
        assert!(parse.message.contains("BOGUS"));

        let err = parse_tcap("A(a) <= SCAN('s', 'db' 'C')").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_projection_must_share_input_set() {
        let text = "
            A(a) <= SCAN('s', 'db', 'C')
            B(b) <= SCAN('t', 'db', 'D')
            X(b, c) <= APPLY(A(a), B(b), 'E', 'f')
        ";
        assert!(matches!(parse_tcap(text), Err(Error::Parse(_))));
    }

    #[test]
    fn test_shape_checked() {
        let text = "
            A(a) <= SCAN('s', 'db', 'C')
            B(a) <= APPLY(A(a), A(a), 'E', 'f')
        ";
        let Err(Error::Parse(err)) = parse_tcap(text) else {
            panic!("expected a parse error");
        };
        assert!(err.message.contains("declares 1 columns, expected 2"));
    }

    #[test]
    fn test_unresolved_input() {
        let err = parse_tcap("B(a, b) <= APPLY(A(a), A(a), 'E', 'f')").unwrap_err();
        assert!(matches!(err, Error::UnresolvedTupleSet { .. }));
    }
}
