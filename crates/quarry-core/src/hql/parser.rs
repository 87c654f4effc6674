//! Recursive descent parser for the query language.

use super::ast::*;
use super::lexer::{tokenize, Spanned, Token};
use crate::{
    sqm::{
        ArithmeticOp, ComparisonOp, JoinKind, Materialization, NullPrecedence, SearchKind,
        SetOperator,
    },
    Error, Result,
};

/// Words that end an expression or from element, so they are never taken
/// as an implicit alias.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "cross", "cycle", "default", "delete",
    "desc", "distinct", "else", "end", "escape", "except", "exists", "fetch", "first", "from",
    "full", "group", "having", "in", "inner", "insert", "intersect", "into", "is", "join",
    "last", "left", "like", "limit", "materialized", "next", "not", "nulls", "offset", "on",
    "only", "or", "order", "outer", "right", "row", "rows", "search", "select", "set", "then",
    "to", "union", "update", "using", "values", "when", "where", "with",
];

pub(crate) struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(src: &'a str) -> Result<Parser<'a>> {
        Ok(Parser {
            src,
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Statement> {
        let stmt = if self.peek_kw("update") {
            Statement::Update(self.parse_update()?)
        } else if self.peek_kw("delete") {
            Statement::Delete(self.parse_delete()?)
        } else if self.peek_kw("insert") {
            Statement::Insert(self.parse_insert()?)
        } else {
            Statement::Select(self.parse_query()?)
        };
        self.expect_end()?;
        Ok(stmt)
    }

    /// Parses a standalone predicate, as used by filter conditions.
    pub(crate) fn parse_condition(&mut self) -> Result<Predicate> {
        let predicate = self.parse_predicate()?;
        self.expect_end()?;
        Ok(predicate)
    }

    fn parse_query(&mut self) -> Result<Query> {
        let ctes = if self.eat_kw("with") {
            self.parse_ctes()?
        } else {
            vec![]
        };

        let body = self.parse_query_body()?;

        let mut order_by = vec![];
        if self.eat_kw("order") {
            self.expect_kw("by")?;
            order_by = self.parse_sort_items()?;
        }

        let (offset, fetch) = self.parse_limit_offset()?;

        Ok(Query {
            ctes,
            body,
            order_by,
            offset,
            fetch,
        })
    }

    fn parse_query_body(&mut self) -> Result<QueryBody> {
        let mut lhs = self.parse_query_primary()?;

        loop {
            let op = if self.eat_kw("union") {
                if self.eat_kw("all") {
                    SetOperator::UnionAll
                } else {
                    self.eat_kw("distinct");
                    SetOperator::Union
                }
            } else if self.eat_kw("intersect") {
                if self.eat_kw("all") {
                    SetOperator::IntersectAll
                } else {
                    SetOperator::Intersect
                }
            } else if self.eat_kw("except") {
                if self.eat_kw("all") {
                    SetOperator::ExceptAll
                } else {
                    SetOperator::Except
                }
            } else {
                break;
            };

            let rhs = self.parse_query_primary()?;
            lhs = QueryBody::Set {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_query_primary(&mut self) -> Result<QueryBody> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let query = self.parse_query()?;
            self.expect(Token::RParen)?;
            return Ok(QueryBody::Nested(Box::new(query)));
        }
        Ok(QueryBody::Spec(Box::new(self.parse_query_spec()?)))
    }

    fn parse_query_spec(&mut self) -> Result<QuerySpec> {
        let mut spec = QuerySpec::default();

        if self.eat_kw("select") {
            spec.distinct = self.eat_kw("distinct");
            spec.select = self.parse_select_items()?;
        }

        self.expect_kw("from")?;
        spec.from = self.parse_from()?;

        if self.eat_kw("where") {
            spec.where_ = Some(self.parse_predicate()?);
        }

        if self.eat_kw("group") {
            self.expect_kw("by")?;
            spec.group_by = self.parse_expr_list()?;
        }

        if self.eat_kw("having") {
            spec.having = Some(self.parse_predicate()?);
        }

        Ok(spec)
    }

    fn parse_select_items(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![];
        loop {
            let expr = self.parse_expr()?;
            let alias = self.parse_alias()?;
            items.push(SelectItem { expr, alias });
            if !self.eat(&Token::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_from(&mut self) -> Result<Vec<FromRoot>> {
        let mut roots = vec![];
        loop {
            let path = self.parse_dotted()?;
            let alias = self.parse_alias()?;
            let mut root = FromRoot {
                path,
                alias,
                joins: vec![],
            };

            while let Some(join) = self.parse_join()? {
                root.joins.push(join);
            }
            roots.push(root);

            if !self.eat(&Token::Comma) {
                return Ok(roots);
            }
        }
    }

    fn parse_join(&mut self) -> Result<Option<Join>> {
        let kind = if self.eat_kw("join") {
            JoinKind::Inner
        } else if self.peek_kw("inner") {
            self.advance();
            self.expect_kw("join")?;
            JoinKind::Inner
        } else if self.peek_kw("left") || self.peek_kw("right") {
            let left = self.eat_kw("left");
            if !left {
                self.advance();
            }
            self.eat_kw("outer");
            self.expect_kw("join")?;
            if left {
                JoinKind::Left
            } else {
                JoinKind::Right
            }
        } else if self.peek_kw("cross") {
            self.advance();
            self.expect_kw("join")?;
            JoinKind::Cross
        } else {
            return Ok(None);
        };

        let fetch = self.eat_kw("fetch");
        let path = self.parse_dotted()?;
        let alias = self.parse_alias()?;
        let on = if self.eat_kw("on") || self.eat_kw("with") {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Some(Join {
            kind,
            fetch,
            path,
            alias,
            on,
        }))
    }

    fn parse_ctes(&mut self) -> Result<Vec<Cte>> {
        let mut ctes = vec![];
        loop {
            let name = self.ident()?;

            let columns = if self.eat(&Token::LParen) {
                let columns = self.parse_ident_list()?;
                self.expect(Token::RParen)?;
                Some(columns)
            } else {
                None
            };

            self.expect_kw("as")?;

            let materialization = if self.eat_kw("materialized") {
                Materialization::Materialized
            } else if self.peek_kw("not") && self.peek_kw_at(1, "materialized") {
                self.advance();
                self.advance();
                Materialization::NotMaterialized
            } else {
                Materialization::Undefined
            };

            self.expect(Token::LParen)?;
            let query = self.parse_query()?;
            self.expect(Token::RParen)?;

            let search = if self.eat_kw("search") {
                Some(self.parse_search()?)
            } else {
                None
            };

            let cycle = if self.eat_kw("cycle") {
                Some(self.parse_cycle()?)
            } else {
                None
            };

            ctes.push(Cte {
                name,
                columns,
                materialization,
                query,
                search,
                cycle,
            });

            if !self.eat(&Token::Comma) {
                return Ok(ctes);
            }
        }
    }

    /// `search (breadth | depth) first by item, … set column`
    fn parse_search(&mut self) -> Result<SearchClause> {
        let kind = if self.eat_kw("breadth") {
            SearchKind::BreadthFirst
        } else if self.eat_kw("depth") {
            SearchKind::DepthFirst
        } else {
            return Err(self.unexpected("`breadth` or `depth`"));
        };
        self.expect_kw("first")?;
        self.expect_kw("by")?;

        let mut items = vec![];
        loop {
            let column = self.ident()?;
            let (desc, nulls) = self.parse_sort_suffix()?;
            items.push((column, desc, nulls));
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect_kw("set")?;
        let set_column = self.ident()?;

        Ok(SearchClause {
            kind,
            items,
            set_column,
        })
    }

    /// `cycle column, … set mark [to value default value] [using path]`
    fn parse_cycle(&mut self) -> Result<CycleClause> {
        let columns = self.parse_ident_list()?;
        self.expect_kw("set")?;
        let mark_column = self.ident()?;

        let values = if self.eat_kw("to") {
            let cycle = self.parse_literal()?;
            self.expect_kw("default")?;
            let no_cycle = self.parse_literal()?;
            Some((cycle, no_cycle))
        } else {
            None
        };

        let path_column = if self.eat_kw("using") {
            Some(self.ident()?)
        } else {
            None
        };

        Ok(CycleClause {
            columns,
            mark_column,
            values,
            path_column,
        })
    }

    fn parse_update(&mut self) -> Result<Update> {
        self.expect_kw("update")?;
        self.eat_kw("versioned");
        let entity = self.ident()?;
        let alias = self.parse_alias()?;
        self.expect_kw("set")?;

        let mut assignments = vec![];
        loop {
            let path = self.parse_dotted()?;
            self.expect(Token::Eq)?;
            let value = self.parse_expr()?;
            assignments.push((path, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        let where_ = if self.eat_kw("where") {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Update {
            entity,
            alias,
            assignments,
            where_,
        })
    }

    fn parse_delete(&mut self) -> Result<Delete> {
        self.expect_kw("delete")?;
        self.eat_kw("from");
        let entity = self.ident()?;
        let alias = self.parse_alias()?;
        let where_ = if self.eat_kw("where") {
            Some(self.parse_predicate()?)
        } else {
            None
        };
        Ok(Delete {
            entity,
            alias,
            where_,
        })
    }

    fn parse_insert(&mut self) -> Result<Insert> {
        self.expect_kw("insert")?;
        self.expect_kw("into")?;
        let entity = self.ident()?;

        self.expect(Token::LParen)?;
        let mut paths = vec![];
        loop {
            paths.push(self.parse_dotted()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;

        let source = if self.eat_kw("values") {
            let mut rows = vec![];
            loop {
                self.expect(Token::LParen)?;
                rows.push(self.parse_expr_list()?);
                self.expect(Token::RParen)?;
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else {
            InsertSource::Query(self.parse_query()?)
        };

        Ok(Insert {
            entity,
            paths,
            source,
        })
    }

    fn parse_sort_items(&mut self) -> Result<Vec<SortItem>> {
        let mut items = vec![];
        loop {
            let expr = self.parse_expr()?;
            let (desc, nulls) = self.parse_sort_suffix()?;
            items.push(SortItem { expr, desc, nulls });
            if !self.eat(&Token::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_sort_suffix(&mut self) -> Result<(bool, Option<NullPrecedence>)> {
        let desc = if self.eat_kw("desc") || self.eat_kw("descending") {
            true
        } else {
            if !self.eat_kw("asc") {
                self.eat_kw("ascending");
            }
            false
        };

        let nulls = if self.eat_kw("nulls") {
            if self.eat_kw("first") {
                Some(NullPrecedence::First)
            } else if self.eat_kw("last") {
                Some(NullPrecedence::Last)
            } else {
                return Err(self.unexpected("`first` or `last`"));
            }
        } else {
            None
        };

        Ok((desc, nulls))
    }

    /// `limit n [offset m]`, `offset m [rows] [fetch …]`, or
    /// `fetch (first | next) n (row | rows) only`.
    fn parse_limit_offset(&mut self) -> Result<(Option<Expr>, Option<Expr>)> {
        let mut offset = None;
        let mut fetch = None;

        if self.eat_kw("limit") {
            fetch = Some(self.parse_expr()?);
            if self.eat_kw("offset") {
                offset = Some(self.parse_expr()?);
            }
            return Ok((offset, fetch));
        }

        if self.eat_kw("offset") {
            offset = Some(self.parse_expr()?);
            let _ = self.eat_kw("rows") || self.eat_kw("row");
        }

        if self.eat_kw("limit") {
            fetch = Some(self.parse_expr()?);
        } else if self.eat_kw("fetch") {
            if !(self.eat_kw("first") || self.eat_kw("next")) {
                return Err(self.unexpected("`first` or `next`"));
            }
            fetch = Some(self.parse_expr()?);
            if !(self.eat_kw("rows") || self.eat_kw("row")) {
                return Err(self.unexpected("`rows`"));
            }
            self.expect_kw("only")?;
        }

        Ok((offset, fetch))
    }

    fn parse_predicate(&mut self) -> Result<Predicate> {
        let mut predicates = vec![self.parse_and()?];
        while self.eat_kw("or") {
            predicates.push(self.parse_and()?);
        }
        Ok(if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Predicate::Or(predicates)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut predicates = vec![self.parse_not()?];
        while self.eat_kw("and") {
            predicates.push(self.parse_not()?);
        }
        Ok(if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            Predicate::And(predicates)
        })
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.peek_kw("not") && !self.peek_kw_at(1, "materialized") {
            self.advance();
            return Ok(Predicate::Not(Box::new(self.parse_not()?)));
        }

        if self.eat_kw("exists") {
            self.expect(Token::LParen)?;
            let query = self.parse_query()?;
            self.expect(Token::RParen)?;
            return Ok(Predicate::Exists(Box::new(query)));
        }

        // `(` opens either a nested predicate or a parenthesized expression.
        if self.peek() == Some(&Token::LParen) && !self.peek_kw_at(1, "select") {
            let start = self.pos;
            self.advance();
            if let Ok(predicate) = self.parse_predicate() {
                if self.eat(&Token::RParen) && !self.continues_expr() {
                    return Ok(predicate);
                }
            }
            self.pos = start;
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Predicate> {
        let expr = self.parse_expr()?;

        if self.eat_kw("is") {
            let negated = self.eat_kw("not");
            if self.eat_kw("null") {
                return Ok(Predicate::IsNull { expr, negated });
            }
            if self.eat_kw("empty") {
                let Expr::Path(path) = expr else {
                    return Err(self.error("`is empty` requires a path"));
                };
                return Ok(Predicate::IsEmpty { path, negated });
            }
            return Err(self.unexpected("`null` or `empty`"));
        }

        let negated = self.peek_kw("not")
            && (self.peek_kw_at(1, "between")
                || self.peek_kw_at(1, "in")
                || self.peek_kw_at(1, "like"));
        if negated {
            self.advance();
        }

        if self.eat_kw("between") {
            let low = self.parse_expr()?;
            self.expect_kw("and")?;
            let high = self.parse_expr()?;
            return Ok(Predicate::Between {
                expr,
                low,
                high,
                negated,
            });
        }

        if self.eat_kw("in") {
            if self.eat(&Token::LParen) {
                if self.peek_kw("select") || self.peek_kw("from") || self.peek_kw("with") {
                    let query = self.parse_query()?;
                    self.expect(Token::RParen)?;
                    return Ok(Predicate::InSubquery {
                        expr,
                        query: Box::new(query),
                        negated,
                    });
                }
                let list = self.parse_expr_list()?;
                self.expect(Token::RParen)?;
                return Ok(Predicate::InList {
                    expr,
                    list,
                    negated,
                });
            }
            // `in :param`
            let param = self.parse_primary()?;
            return Ok(Predicate::InList {
                expr,
                list: vec![param],
                negated,
            });
        }

        if self.eat_kw("like") {
            let pattern = self.parse_expr()?;
            let escape = if self.eat_kw("escape") {
                match self.advance_token() {
                    Some(Token::String(s)) if s.chars().count() == 1 => s.chars().next(),
                    _ => return Err(self.error("escape must be a single character string")),
                }
            } else {
                None
            };
            return Ok(Predicate::Like {
                expr,
                pattern,
                escape,
                negated,
            });
        }

        let op = match self.peek() {
            Some(Token::Eq) => ComparisonOp::Eq,
            Some(Token::Ne) => ComparisonOp::Ne,
            Some(Token::Lt) => ComparisonOp::Lt,
            Some(Token::Le) => ComparisonOp::Le,
            Some(Token::Gt) => ComparisonOp::Gt,
            Some(Token::Ge) => ComparisonOp::Ge,
            _ => return Ok(Predicate::Expr(expr)),
        };
        self.advance();
        let rhs = self.parse_expr()?;
        Ok(Predicate::Comparison { lhs: expr, op, rhs })
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Sub,
                Some(Token::Concat) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Concat(Box::new(lhs), Box::new(rhs));
                    continue;
                }
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Arithmetic {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithmeticOp::Mul,
                Some(Token::Slash) => ArithmeticOp::Div,
                Some(Token::Percent) => ArithmeticOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Arithmetic {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(match self.parse_unary()? {
                Expr::Literal(Literal::Integer(v)) => Expr::Literal(Literal::Integer(-v)),
                Expr::Literal(Literal::Decimal(v)) => Expr::Literal(Literal::Decimal(-v)),
                expr => Expr::Negate(Box::new(expr)),
            });
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("an expression"));
        };

        match token {
            Token::Integer(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(v)))
            }
            Token::Decimal(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Decimal(v)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::NamedParam(name) => {
                self.advance();
                Ok(Expr::NamedParam(name.to_string()))
            }
            Token::PositionalParam(position) => {
                self.advance();
                Ok(Expr::PositionalParam(position))
            }
            Token::LParen => {
                self.advance();
                if self.peek_kw("select") || self.peek_kw("from") || self.peek_kw("with") {
                    let query = self.parse_query()?;
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }
                let mut items = self.parse_expr_list()?;
                self.expect(Token::RParen)?;
                Ok(if items.len() == 1 {
                    items.remove(0)
                } else {
                    Expr::Tuple(items)
                })
            }
            Token::Ident(ident) => {
                if ident.eq_ignore_ascii_case("true") || ident.eq_ignore_ascii_case("false") {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Bool(ident.eq_ignore_ascii_case("true"))));
                }
                if ident.eq_ignore_ascii_case("null") {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Null));
                }
                if ident.eq_ignore_ascii_case("case") {
                    self.advance();
                    return self.parse_case();
                }
                if self.peek_at(1) == Some(&Token::LParen) {
                    self.advance();
                    return self.parse_function(ident);
                }
                Ok(Expr::Path(self.parse_dotted()?))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<Expr> {
        self.expect(Token::LParen)?;

        if self.eat(&Token::Star) {
            self.expect(Token::RParen)?;
            if !name.eq_ignore_ascii_case("count") {
                return Err(self.error(format!("`*` is only allowed in `count`, not `{name}`")));
            }
            return Ok(Expr::CountStar);
        }

        let distinct = self.eat_kw("distinct");
        let args = if self.peek() == Some(&Token::RParen) {
            vec![]
        } else {
            self.parse_expr_list()?
        };
        self.expect(Token::RParen)?;

        Ok(Expr::Function {
            name: name.to_string(),
            args,
            distinct,
        })
    }

    fn parse_case(&mut self) -> Result<Expr> {
        let mut whens = vec![];
        while self.eat_kw("when") {
            let when = self.parse_predicate()?;
            self.expect_kw("then")?;
            let then = self.parse_expr()?;
            whens.push((when, then));
        }
        if whens.is_empty() {
            return Err(self.unexpected("`when`"));
        }
        let otherwise = if self.eat_kw("else") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_kw("end")?;
        Ok(Expr::Case { whens, otherwise })
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.parse_unary()? {
            Expr::Literal(literal) => Ok(literal),
            _ => Err(self.error("expected a literal")),
        }
    }

    fn parse_dotted(&mut self) -> Result<Vec<String>> {
        let mut path = vec![self.ident()?];
        while self.eat(&Token::Dot) {
            path.push(self.ident()?);
        }
        Ok(path)
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        let mut idents = vec![self.ident()?];
        while self.eat(&Token::Comma) {
            idents.push(self.ident()?);
        }
        Ok(idents)
    }

    /// `[as] alias`, where an implicit alias may not be a reserved word.
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.eat_kw("as") {
            return Ok(Some(self.ident()?));
        }
        match self.peek() {
            Some(Token::Ident(ident))
                if !RESERVED.iter().any(|kw| ident.eq_ignore_ascii_case(kw)) =>
            {
                let alias = ident.to_string();
                self.advance();
                Ok(Some(alias))
            }
            _ => Ok(None),
        }
    }

    /// True if the next token extends an expression, meaning a
    /// parenthesized group just closed was an operand rather than a
    /// predicate.
    fn continues_expr(&self) -> bool {
        match self.peek() {
            Some(
                Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Slash
                | Token::Percent
                | Token::Concat
                | Token::Eq
                | Token::Ne
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge,
            ) => true,
            Some(token) => ["is", "in", "between", "like", "not"]
                .iter()
                .any(|kw| token.is_keyword(kw)),
            None => false,
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(ident)) => {
                let ident = ident.to_string();
                self.advance();
                Ok(ident)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token<'a>> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn peek_kw(&self, kw: &str) -> bool {
        self.peek_kw_at(0, kw)
    }

    fn peek_kw_at(&self, n: usize, kw: &str) -> bool {
        self.peek_at(n).is_some_and(|token| token.is_keyword(kw))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{kw}`")))
        }
    }

    fn eat(&mut self, token: &Token<'_>) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token<'_>) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{token:?}")))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            return Err(self.unexpected("end of query"));
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn advance_token(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        self.pos += 1;
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.span.start)
            .unwrap_or(self.src.len())
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::query_syntax(message, self.offset())
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.tokens.get(self.pos) {
            Some(token) => self.error(format!(
                "expected {expected}, found `{}`",
                &self.src[token.span.clone()]
            )),
            None => self.error(format!("expected {expected}, found end of query")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Statement {
        Parser::new(src).unwrap().parse_statement().unwrap()
    }

    fn query(src: &str) -> Query {
        match parse(src) {
            Statement::Select(query) => query,
            stmt => panic!("expected select, got {stmt:?}"),
        }
    }

    #[test]
    fn select_without_select_clause() {
        let q = query("from Person p where p.name = :name");
        let QueryBody::Spec(spec) = q.body else {
            panic!()
        };
        assert!(spec.select.is_empty());
        assert_eq!(spec.from[0].alias.as_deref(), Some("p"));
        assert_eq!(
            spec.where_,
            Some(Predicate::Comparison {
                lhs: Expr::Path(vec!["p".into(), "name".into()]),
                op: ComparisonOp::Eq,
                rhs: Expr::NamedParam("name".into()),
            })
        );
    }

    #[test]
    fn keywords_are_case_insensitive_and_contextual() {
        let q = query("SELECT c.depth FROM Category c ORDER BY c.depth DESC NULLS LAST");
        assert_eq!(q.order_by.len(), 1);
        assert!(q.order_by[0].desc);
        assert_eq!(q.order_by[0].nulls, Some(NullPrecedence::Last));
    }

    #[test]
    fn ascending_spellings_sort_ascending() {
        let q = query("from P p order by p.a asc, p.b ascending nulls first, p.c");
        assert_eq!(q.order_by.len(), 3);
        assert!(q.order_by.iter().all(|item| !item.desc));
        assert_eq!(q.order_by[1].nulls, Some(NullPrecedence::First));
    }

    #[test]
    fn parenthesized_predicate_and_expression() {
        let q = query("from P p where (p.a = 1 or p.b = 2) and (p.c + 1) > 3");
        let QueryBody::Spec(spec) = q.body else {
            panic!()
        };
        let Some(Predicate::And(parts)) = spec.where_ else {
            panic!("expected and")
        };
        assert!(matches!(parts[0], Predicate::Or(_)));
        assert!(matches!(parts[1], Predicate::Comparison { op: ComparisonOp::Gt, .. }));
    }

    #[test]
    fn recursive_cte_with_search_and_cycle() {
        let q = query(
            "with tree as (
                select c.id as id, c.parent as parent from Category c where c.parent is null
                union all
                select c.id as id, c.parent as parent from tree t join Category c on c.parent.id = t.id
             ) search depth first by id set ord
               cycle id set is_cycle to 'Y' default 'N' using path
             select t.id from tree t order by t.ord",
        );

        let cte = &q.ctes[0];
        assert_eq!(cte.name, "tree");
        assert!(cte.query.references("tree"));
        let search = cte.search.as_ref().unwrap();
        assert_eq!(search.kind, SearchKind::DepthFirst);
        assert_eq!(search.set_column, "ord");
        let cycle = cte.cycle.as_ref().unwrap();
        assert_eq!(cycle.mark_column, "is_cycle");
        assert_eq!(cycle.path_column.as_deref(), Some("path"));
        assert_eq!(
            cycle.values,
            Some((Literal::String("Y".into()), Literal::String("N".into())))
        );
    }

    #[test]
    fn offset_fetch_and_limit_forms() {
        let q = query("from P p offset 10 rows fetch first 5 rows only");
        assert_eq!(q.offset, Some(Expr::Literal(Literal::Integer(10))));
        assert_eq!(q.fetch, Some(Expr::Literal(Literal::Integer(5))));

        let q = query("from P p limit 5 offset 10");
        assert_eq!(q.offset, Some(Expr::Literal(Literal::Integer(10))));
        assert_eq!(q.fetch, Some(Expr::Literal(Literal::Integer(5))));
    }

    #[test]
    fn dml_statements() {
        assert!(matches!(
            parse("update Person p set p.name = 'x' where p.id = 1"),
            Statement::Update(_)
        ));
        assert!(matches!(parse("delete from Person p"), Statement::Delete(_)));
        let Statement::Insert(insert) =
            parse("insert into Person (id, name) values (1, 'a'), (2, 'b')")
        else {
            panic!()
        };
        assert!(matches!(insert.source, InsertSource::Values(rows) if rows.len() == 2));
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = Parser::new("select p from Person p where")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        assert!(err.is_query_syntax());
        assert_eq!(
            err.to_string(),
            "query syntax error at offset 28: expected an expression, found end of query"
        );
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = Parser::new("from Person p p2")
            .unwrap()
            .parse_statement()
            .unwrap_err();
        assert!(err.is_query_syntax());
    }
}
