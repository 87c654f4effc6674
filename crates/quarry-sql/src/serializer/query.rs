use super::{Comma, Delimited, Flavor, Ident, Params, ToSql};

use crate::ast::{
    Expr, LockMode, NullPrecedence, QueryGroup, QueryPart, QuerySpec, SelectItem,
    SelectStatement, SetOperator, SortSpec,
};
use quarry_core::Error;

impl ToSql for &SelectStatement {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        // Table hints only apply to the tables of this query level
        let outer_hint = f.table_hint.take();

        if let Some(with) = &self.with {
            fmt!(f, with " ");
        }

        let lock = self
            .lock
            .filter(|_| f.serializer.capability.select_for_update);

        if lock.is_some() && matches!(self.body, QueryPart::Group(_)) {
            f.fail(Error::not_yet_implemented(
                "row locking on a set operation",
            ));
        }

        if f.serializer.is_sqlserver() {
            f.table_hint = lock;
        }

        fmt!(f, self.body);

        f.table_hint = outer_hint;

        match (lock, f.flavor()) {
            (Some(LockMode::Update), Flavor::Postgresql | Flavor::Mysql) => {
                fmt!(f, " FOR UPDATE")
            }
            (Some(LockMode::Share), Flavor::Postgresql | Flavor::Mysql) => {
                fmt!(f, " FOR SHARE")
            }
            _ => {}
        }
    }
}

impl ToSql for &QueryPart {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self {
            QueryPart::Spec(spec) => spec.to_sql(f),
            QueryPart::Group(group) => group.to_sql(f),
        }
    }
}

impl ToSql for &QuerySpec {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if self.select.is_empty() {
            f.fail(Error::sql_ast_syntax(
                "query specification without a select list",
            ));
            return;
        }

        let sqlserver = f.serializer.is_sqlserver();

        if sqlserver && self.offset.is_some() && self.order_by.is_empty() {
            return row_number_window(self, f);
        }

        fmt!(f, "SELECT ");

        if self.distinct {
            fmt!(f, "DISTINCT ");
        }

        let top = sqlserver && self.offset.is_none();
        if let (true, Some(fetch)) = (top, &self.fetch) {
            fmt!(f, "TOP(" fetch ") ");
        }

        fmt!(f, Comma(&self.select));
        clauses(self, f);

        if !self.order_by.is_empty() {
            fmt!(f, " ORDER BY " Comma(&self.order_by));
        }

        if !top {
            limit(
                self.order_by.is_empty(),
                self.offset.as_ref(),
                self.fetch.as_ref(),
                f,
            );
        }
    }
}

/// Everything from `FROM` through `HAVING`.
fn clauses<P: Params>(spec: &QuerySpec, f: &mut super::Formatter<'_, P>) {
    if !spec.from.is_empty() {
        fmt!(f, " FROM " Comma(&spec.from));
    }

    if let Some(where_) = &spec.where_ {
        fmt!(f, " WHERE " where_);
    }

    if !spec.group_by.is_empty() {
        fmt!(f, " GROUP BY " Comma(&spec.group_by));
    }

    if let Some(having) = &spec.having {
        fmt!(f, " HAVING " having);
    }
}

/// SQL Server cannot skip rows without an ordering, so the rows are numbered
/// in a derived table and filtered on the number.
fn row_number_window<P: Params>(spec: &QuerySpec, f: &mut super::Formatter<'_, P>) {
    if spec.distinct {
        f.fail(Error::not_yet_implemented(
            "distinct with offset and no ordering on SQL Server",
        ));
        return;
    }

    let names: Vec<String> = spec
        .select
        .iter()
        .enumerate()
        .map(|(i, item)| item.alias.clone().unwrap_or_else(|| format!("c{i}")))
        .collect();

    fmt!(f, "SELECT ");
    let mut s = "";
    for name in &names {
        fmt!(f, s "r_." Ident(name));
        s = ", ";
    }

    fmt!(f, " FROM (SELECT ");
    let mut s = "";
    for (item, name) in spec.select.iter().zip(&names) {
        fmt!(f, s item.expr " AS " Ident(name));
        s = ", ";
    }
    fmt!(f, ", ROW_NUMBER() OVER (ORDER BY (SELECT 0)) AS rn_");
    clauses(spec, f);
    fmt!(f, ") r_");

    if let Some(offset) = &spec.offset {
        fmt!(f, " WHERE r_.rn_ > " offset);
        if let Some(fetch) = &spec.fetch {
            fmt!(f, " AND r_.rn_ <= " offset " + " fetch);
        }
    }
}

fn limit<P: Params>(
    order_by_empty: bool,
    offset: Option<&Expr>,
    fetch: Option<&Expr>,
    f: &mut super::Formatter<'_, P>,
) {
    match f.flavor() {
        Flavor::Sqlite | Flavor::Mysql => {
            match (fetch, offset) {
                (Some(fetch), _) => fmt!(f, " LIMIT " fetch),
                (None, Some(_)) if f.serializer.is_sqlite() => fmt!(f, " LIMIT -1"),
                (None, Some(_)) => fmt!(f, " LIMIT 18446744073709551615"),
                (None, None) => {}
            }
            if let Some(offset) = offset {
                fmt!(f, " OFFSET " offset);
            }
        }
        Flavor::Postgresql => {
            if let Some(offset) = offset {
                fmt!(f, " OFFSET " offset " ROWS");
            }
            if let Some(fetch) = fetch {
                fmt!(f, " FETCH FIRST " fetch " ROWS ONLY");
            }
        }
        Flavor::SqlServer => {
            if offset.is_none() && fetch.is_none() {
                return;
            }
            if order_by_empty {
                fmt!(f, " ORDER BY (SELECT 0)");
            }
            match offset {
                Some(offset) => fmt!(f, " OFFSET " offset " ROWS"),
                None => fmt!(f, " OFFSET 0 ROWS"),
            }
            if let Some(fetch) = fetch {
                fmt!(f, " FETCH NEXT " fetch " ROWS ONLY");
            }
        }
    }
}

impl ToSql for &QueryGroup {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if self.parts.is_empty() {
            f.fail(Error::sql_ast_syntax("set operation without members"));
            return;
        }

        let all_unsupported = matches!(
            (f.flavor(), self.op),
            (
                Flavor::Sqlite | Flavor::SqlServer,
                SetOperator::IntersectAll | SetOperator::ExceptAll
            )
        );
        if all_unsupported {
            f.fail(Error::not_yet_implemented(format!(
                "{:?} on {:?}",
                self.op,
                f.serializer.dialect()
            )));
        }

        let op = match self.op {
            SetOperator::Union => " UNION ",
            SetOperator::UnionAll => " UNION ALL ",
            SetOperator::Intersect => " INTERSECT ",
            SetOperator::IntersectAll => " INTERSECT ALL ",
            SetOperator::Except => " EXCEPT ",
            SetOperator::ExceptAll => " EXCEPT ALL ",
        };

        fmt!(f, Delimited(self.parts.iter().map(Member), op));

        if !self.order_by.is_empty() {
            fmt!(f, " ORDER BY " Comma(&self.order_by));
        }

        limit(
            self.order_by.is_empty(),
            self.offset.as_ref(),
            self.fetch.as_ref(),
            f,
        );
    }
}

/// A member of a set operation. Members with their own ordering or limit,
/// and nested groups, must be isolated from the operator.
struct Member<'a>(&'a QueryPart);

impl ToSql for Member<'_> {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        let part = self.0;
        let isolate =
            matches!(part, QueryPart::Group(_)) || part.has_order_by() || part.has_limit();

        if !isolate {
            part.to_sql(f);
        } else if f.serializer.is_sqlite() {
            fmt!(f, "SELECT * FROM (" part ")");
        } else {
            fmt!(f, "(" part ")");
        }
    }
}

impl ToSql for &SelectItem {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, self.expr);
        if let Some(alias) = &self.alias {
            fmt!(f, " AS " Ident(alias));
        }
    }
}

impl ToSql for &SortSpec {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        let native_nulls = matches!(f.flavor(), Flavor::Sqlite | Flavor::Postgresql);

        if let (false, Some(nulls)) = (native_nulls, self.nulls) {
            let (null, not_null) = match nulls {
                NullPrecedence::First => ("0", "1"),
                NullPrecedence::Last => ("1", "0"),
            };
            fmt!(f, "CASE WHEN " self.expr " IS NULL THEN " null " ELSE " not_null " END, ");
        }

        fmt!(f, self.expr);

        if self.desc {
            fmt!(f, " DESC");
        }

        match (native_nulls, self.nulls) {
            (true, Some(NullPrecedence::First)) => fmt!(f, " NULLS FIRST"),
            (true, Some(NullPrecedence::Last)) => fmt!(f, " NULLS LAST"),
            _ => {}
        }
    }
}
