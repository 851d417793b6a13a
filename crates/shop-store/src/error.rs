use shop_core::ShopError;

/// Converts `sqlx::Error` into `ShopError`.
///
/// Orphan rules forbid `From<sqlx::Error> for ShopError` here, so store code
/// maps explicitly with `.map_err(SqlxErrorExt::into_shop_error)`.
pub trait SqlxErrorExt {
    fn into_shop_error(self) -> ShopError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_shop_error(self) -> ShopError {
        match &self {
            sqlx::Error::Database(db) if db.is_unique_violation() => ShopError::Store(format!(
                "duplicate key value violates unique constraint {}",
                db.constraint().unwrap_or("unknown")
            )),
            _ => ShopError::Store(self.to_string()),
        }
    }
}

/// Map a row quantity back to the domain type
pub(crate) fn quantity(raw: i32) -> Result<u32, ShopError> {
    u32::try_from(raw).map_err(|_| ShopError::Store(format!("negative quantity {raw} in row")))
}

pub(crate) fn db_quantity(q: u32) -> Result<i32, ShopError> {
    i32::try_from(q).map_err(|_| ShopError::Validation(format!("quantity {q} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_store() {
        let err = sqlx::Error::RowNotFound.into_shop_error();
        assert!(matches!(err, ShopError::Store(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_quantity_bounds() {
        assert_eq!(quantity(3).unwrap(), 3);
        assert!(quantity(-1).is_err());
        assert!(db_quantity(u32::MAX).is_err());
    }
}
