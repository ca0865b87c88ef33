//! Pure scan-and-diff.
//!
//! [`plan`] compares the authoritative products with the current derived
//! rows and lists the writes that bring the derived rows in line. Nothing
//! here touches a store, so the rule can be exercised without one and the
//! full scan can later be swapped for a change feed that produces the
//! same [`Change`] list.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ArchivedEntry, InventoryEntry, Product, ProductId, StockStatus};
use crate::store::Change;

/// Writes needed to make `inventory` and `archived` agree with `products`.
///
/// Per product, in order: status write-back, inventory write, archive
/// write. Rows already in their target state produce nothing, so planning
/// over freshly reconciled tables yields an empty list.
///
/// Derived rows whose product no longer exists are deleted. Both stores
/// tie derived rows to their product with a cascading foreign key, so such
/// rows only appear when the tables were written around the store; in
/// particular an empty product table over consistent derived tables plans
/// nothing.
pub fn plan(
    products: &[Product],
    inventory: &[InventoryEntry],
    archived: &[ArchivedEntry],
) -> Vec<Change> {
    let inventory: BTreeMap<ProductId, &InventoryEntry> =
        inventory.iter().map(|e| (e.product_id, e)).collect();
    let archived: BTreeMap<ProductId, &ArchivedEntry> =
        archived.iter().map(|e| (e.product_id, e)).collect();

    let mut changes = Vec::new();
    for product in products {
        plan_product(
            product,
            inventory.get(&product.product_id).copied(),
            archived.get(&product.product_id).copied(),
            &mut changes,
        );
    }

    let known: BTreeSet<ProductId> = products.iter().map(|p| p.product_id).collect();
    changes.extend(
        inventory
            .keys()
            .filter(|id| !known.contains(id))
            .map(|&product_id| Change::DeleteInventory { product_id }),
    );
    changes.extend(
        archived
            .keys()
            .filter(|id| !known.contains(id))
            .map(|&product_id| Change::DeleteArchived { product_id }),
    );
    changes
}

fn plan_product(
    product: &Product,
    inventory: Option<&InventoryEntry>,
    archived: Option<&ArchivedEntry>,
    changes: &mut Vec<Change>,
) {
    let status = product.derived_status();
    if product.status() != status {
        changes.push(Change::MarkProduct {
            product_id: product.product_id,
            status,
        });
    }

    if status == StockStatus::AVAILABLE {
        let wanted = InventoryEntry::for_product(product);
        match inventory {
            None => changes.push(Change::InsertInventory(wanted)),
            Some(current) if *current != wanted => changes.push(Change::UpdateInventory(wanted)),
            Some(_) => {}
        }
        if archived.is_some() {
            changes.push(Change::DeleteArchived {
                product_id: product.product_id,
            });
        }
    } else {
        if inventory.is_some() {
            changes.push(Change::DeleteInventory {
                product_id: product.product_id,
            });
        }
        let wanted = ArchivedEntry::for_product(product);
        if archived != Some(&wanted) {
            changes.push(Change::UpsertArchived(wanted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn product(id: ProductId, stock: i32, status: StockStatus) -> Product {
        Product {
            product_id: id,
            category_id: 1,
            name: format!("product-{id}"),
            description: None,
            price: Decimal::new(100, 2),
            stock,
            image_url: None,
            date_added: chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(9, 0, 0))
                .unwrap(),
            is_available: status.is_available,
            is_archived: status.is_archived,
        }
    }

    fn inventory_row(id: ProductId, stock: i32) -> InventoryEntry {
        InventoryEntry {
            product_id: id,
            name: format!("product-{id}"),
            stock,
            is_available: true,
        }
    }

    fn archived_row(id: ProductId) -> ArchivedEntry {
        ArchivedEntry {
            product_id: id,
            name: format!("product-{id}"),
            stock: 0,
            is_archived: true,
        }
    }

    #[test]
    fn test_stocked_product_gets_inventory_row() {
        let p = product(1, 10, StockStatus::AVAILABLE);
        let changes = plan(&[p], &[], &[]);
        assert_eq!(changes, vec![Change::InsertInventory(inventory_row(1, 10))]);
    }

    #[test]
    fn test_exhausted_product_is_archived_and_marked() {
        let p = product(
            2,
            0,
            StockStatus {
                is_available: false,
                is_archived: false,
            },
        );
        let changes = plan(&[p], &[], &[]);
        assert_eq!(
            changes,
            vec![
                Change::MarkProduct {
                    product_id: 2,
                    status: StockStatus::ARCHIVED
                },
                Change::UpsertArchived(archived_row(2)),
            ]
        );
    }

    #[test]
    fn test_stock_change_updates_inventory_in_place() {
        let p = product(3, 3, StockStatus::AVAILABLE);
        let changes = plan(&[p], &[inventory_row(3, 7)], &[]);
        assert_eq!(changes, vec![Change::UpdateInventory(inventory_row(3, 3))]);
    }

    #[test]
    fn test_sold_out_product_leaves_inventory() {
        let p = product(4, 0, StockStatus::AVAILABLE);
        let changes = plan(&[p], &[inventory_row(4, 2)], &[]);
        assert_eq!(
            changes,
            vec![
                Change::MarkProduct {
                    product_id: 4,
                    status: StockStatus::ARCHIVED
                },
                Change::DeleteInventory { product_id: 4 },
                Change::UpsertArchived(archived_row(4)),
            ]
        );
    }

    #[test]
    fn test_restocked_product_leaves_archive() {
        let p = product(5, 5, StockStatus::ARCHIVED);
        let changes = plan(&[p], &[], &[archived_row(5)]);
        assert_eq!(
            changes,
            vec![
                Change::MarkProduct {
                    product_id: 5,
                    status: StockStatus::AVAILABLE
                },
                Change::InsertInventory(inventory_row(5, 5)),
                Change::DeleteArchived { product_id: 5 },
            ]
        );
    }

    #[test]
    fn test_reconciled_tables_plan_nothing() {
        let products = [
            product(1, 10, StockStatus::AVAILABLE),
            product(2, 0, StockStatus::ARCHIVED),
        ];
        assert!(plan(&products, &[inventory_row(1, 10)], &[archived_row(2)]).is_empty());
    }

    #[test]
    fn test_stale_archive_row_is_rewritten() {
        let p = product(6, 0, StockStatus::ARCHIVED);
        let mut stale = archived_row(6);
        stale.name = "old name".to_string();
        stale.stock = 4;
        assert_eq!(
            plan(&[p], &[], &[stale]),
            vec![Change::UpsertArchived(archived_row(6))]
        );
    }

    #[test]
    fn test_orphaned_rows_are_dropped() {
        let changes = plan(&[], &[inventory_row(8, 1)], &[archived_row(9)]);
        assert_eq!(
            changes,
            vec![
                Change::DeleteInventory { product_id: 8 },
                Change::DeleteArchived { product_id: 9 },
            ]
        );
    }

    #[test]
    fn test_empty_tables_plan_nothing() {
        assert!(plan(&[], &[], &[]).is_empty());
    }
}
