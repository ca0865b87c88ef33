//! Storefront schema bootstrap.
//!
//! Table statements are built with sea-query so tests can inspect the
//! generated DDL without a database. [`ensure_schema`] applies them with
//! `IF NOT EXISTS` and is safe to run on every startup.

use sea_query::{
    ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, IndexCreateStatement,
    PostgresQueryBuilder, Table, TableCreateStatement,
};

use crate::executor::{Executor, StoreError};

pub const CATEGORIES: &str = "categories";
pub const PRODUCTS: &str = "products";
pub const INVENTORIES: &str = "inventories";
pub const ARCHIVED: &str = "archived";

pub fn create_categories_table() -> TableCreateStatement {
    Table::create()
        .table(CATEGORIES)
        .if_not_exists()
        .col(
            ColumnDef::new("category_id")
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new("category_name")
                .string()
                .string_len(255)
                .not_null()
                .unique_key(),
        )
        .to_owned()
}

pub fn create_products_table() -> TableCreateStatement {
    Table::create()
        .table(PRODUCTS)
        .if_not_exists()
        .col(
            ColumnDef::new("product_id")
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new("category_id").big_integer().not_null())
        .col(ColumnDef::new("name").string().string_len(200).not_null())
        .col(ColumnDef::new("description").text().null())
        .col(ColumnDef::new("price").decimal_len(10, 2).not_null())
        .col(
            ColumnDef::new("stock")
                .integer()
                .not_null()
                .default(0)
                .check(Expr::col("stock").gte(0)),
        )
        .col(ColumnDef::new("image_url").string().string_len(512).null())
        .col(
            ColumnDef::new("date_added")
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new("is_available")
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new("is_archived")
                .boolean()
                .not_null()
                .default(false),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_products_category")
                .from(PRODUCTS, "category_id")
                .to(CATEGORIES, "category_id")
                .on_delete(ForeignKeyAction::Restrict),
        )
        .to_owned()
}

pub fn create_inventories_table() -> TableCreateStatement {
    derived_table(INVENTORIES, "is_available", "fk_inventories_product")
}

pub fn create_archived_table() -> TableCreateStatement {
    derived_table(ARCHIVED, "is_archived", "fk_archived_product")
}

/// Both derived tables share the product key and mirror name and stock.
fn derived_table(table: &'static str, flag: &'static str, fk_name: &'static str) -> TableCreateStatement {
    Table::create()
        .table(table)
        .if_not_exists()
        .col(
            ColumnDef::new("product_id")
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new("name").string().string_len(200).not_null())
        .col(ColumnDef::new("stock").integer().not_null())
        .col(ColumnDef::new(flag).boolean().not_null())
        .foreign_key(
            ForeignKey::create()
                .name(fk_name)
                .from(table, "product_id")
                .to(PRODUCTS, "product_id")
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

pub fn create_products_category_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_products_category_id")
        .table(PRODUCTS)
        .col(Expr::col("category_id"))
        .if_not_exists()
        .to_owned()
}

/// DDL for every storefront table, in dependency order.
pub fn statements() -> Vec<String> {
    vec![
        create_categories_table().build(PostgresQueryBuilder),
        create_products_table().build(PostgresQueryBuilder),
        create_inventories_table().build(PostgresQueryBuilder),
        create_archived_table().build(PostgresQueryBuilder),
        create_products_category_index().build(PostgresQueryBuilder),
    ]
}

/// Create the storefront tables if they do not exist yet.
pub fn ensure_schema(executor: &dyn Executor) -> Result<(), StoreError> {
    for sql in statements() {
        executor.execute(&sql, &[])?;
    }
    log::info!("storefront schema is in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_in_dependency_order() {
        let ddl = statements();
        assert_eq!(ddl.len(), 5);
        assert!(ddl[0].contains(r#""categories""#));
        assert!(ddl[1].contains(r#""products""#));
        assert!(ddl[2].contains(r#""inventories""#));
        assert!(ddl[3].contains(r#""archived""#));
        assert!(ddl.iter().all(|sql| sql.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_products_table_guards_stock() {
        let sql = create_products_table().build(PostgresQueryBuilder);
        assert!(sql.contains("CHECK"));
        assert!(sql.contains(r#""is_archived""#));
        assert!(sql.contains("REFERENCES"));
    }

    #[test]
    fn test_derived_tables_cascade_with_products() {
        for sql in [
            create_inventories_table().build(PostgresQueryBuilder),
            create_archived_table().build(PostgresQueryBuilder),
        ] {
            assert!(sql.contains("ON DELETE CASCADE"));
            assert!(sql.contains(r#""product_id""#));
        }
    }
}
