use quarry_core::{driver::Driver, err, Result};

use url::Url;

/// Picks the driver for a connection URL by its scheme.
pub(crate) fn driver_for_url(url: &str) -> Result<Box<dyn Driver>> {
    let parsed = Url::parse(url).map_err(anyhow::Error::from)?;

    match parsed.scheme() {
        "sqlite" => connect_sqlite(url),
        scheme => Err(err!("unsupported database; scheme={scheme}; url={url}")),
    }
}

#[cfg(feature = "sqlite")]
fn connect_sqlite(url: &str) -> Result<Box<dyn Driver>> {
    Ok(Box::new(quarry_driver_sqlite::Sqlite::new(url)?))
}

#[cfg(not(feature = "sqlite"))]
fn connect_sqlite(_url: &str) -> Result<Box<dyn Driver>> {
    Err(err!("`sqlite` feature not enabled"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = driver_for_url("oracle://localhost/db").unwrap_err();
        assert!(err.to_string().contains("unsupported database"));
    }
}
