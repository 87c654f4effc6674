use super::Serializer;

use quarry_core::driver::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flavor {
    Postgresql,
    Sqlite,
    Mysql,
    SqlServer,
}

impl From<Dialect> for Flavor {
    fn from(dialect: Dialect) -> Flavor {
        match dialect {
            Dialect::Sqlite => Flavor::Sqlite,
            Dialect::Postgresql => Flavor::Postgresql,
            Dialect::Mysql => Flavor::Mysql,
            Dialect::SqlServer => Flavor::SqlServer,
        }
    }
}

impl Serializer {
    pub fn sqlite() -> Serializer {
        Serializer::for_dialect(Dialect::Sqlite)
    }

    pub fn postgresql() -> Serializer {
        Serializer::for_dialect(Dialect::Postgresql)
    }

    pub fn mysql() -> Serializer {
        Serializer::for_dialect(Dialect::Mysql)
    }

    pub fn sqlserver() -> Serializer {
        Serializer::for_dialect(Dialect::SqlServer)
    }
}
