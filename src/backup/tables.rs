//! Fixed table layouts for user and tenant snapshots.
//!
//! Unlike system snapshots these are pinned to the application schema:
//! the tables, their columns and the delete/insert orders are written out
//! by hand.

use serde_json::{Map, Value};

use super::serializer::SnapshotRow;

pub const TENANT_COLUMN: &str = "tenantId";
pub const TENANTS_TABLE: &str = "tenants";
pub const USERS_TABLE: &str = "users";

/// Scalar tenant fields replaced on a tenant restore. `slug` is handled
/// separately so a missing slug never erases the live one.
pub const TENANT_UPDATE_COLUMNS: &[&str] = &[
    "name",
    "companyName",
    "subscriptionPlan",
    "status",
    "maxUsers",
    "stripeCustomerId",
    "stripeSubscriptionId",
];

/// Value used when a snapshot row has no (or a null) entry for a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    Null,
    Bool(bool),
    Int(i64),
    /// The tenant the restore runs for.
    TenantId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSpec {
    /// Column name in the database
    pub column: &'static str,
    /// Key the column is stored under in the snapshot
    pub key: &'static str,
    pub fallback: Fallback,
}

const fn col(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        column: name,
        key: name,
        fallback: Fallback::Null,
    }
}

const fn tenant() -> ColumnSpec {
    ColumnSpec {
        column: TENANT_COLUMN,
        key: TENANT_COLUMN,
        fallback: Fallback::TenantId,
    }
}

const fn or(name: &'static str, fallback: Fallback) -> ColumnSpec {
    ColumnSpec {
        column: name,
        key: name,
        fallback,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    /// Dump with `SELECT *` instead of the column list.
    pub dump_all_columns: bool,
}

impl TableSpec {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.column).collect()
    }

    /// Map a snapshot row onto this table's columns, applying fallbacks.
    /// The result is keyed by database column name.
    pub fn record_for(&self, row: &SnapshotRow, tenant_id: &str) -> Value {
        let mut record = Map::with_capacity(self.columns.len());
        for spec in self.columns {
            let value = match row.get(spec.key) {
                Some(value) if !value.is_null() => value.clone(),
                _ => match spec.fallback {
                    Fallback::Null => Value::Null,
                    Fallback::Bool(b) => Value::Bool(b),
                    Fallback::Int(n) => Value::from(n),
                    Fallback::TenantId => Value::String(tenant_id.to_string()),
                },
            };
            record.insert(spec.column.to_string(), value);
        }
        Value::Object(record)
    }
}

pub const CUSTOMERS: TableSpec = TableSpec {
    name: "customers",
    columns: &[
        col("id"),
        col("name"),
        col("email"),
        col("phone"),
        col("address"),
        col("taxNumber"),
        col("company"),
        col("balance"),
        tenant(),
        col("createdAt"),
        col("updatedAt"),
    ],
    dump_all_columns: true,
};

pub const SUPPLIERS: TableSpec = TableSpec {
    name: "suppliers",
    columns: CUSTOMERS.columns,
    dump_all_columns: true,
};

pub const PRODUCTS: TableSpec = TableSpec {
    name: "products",
    columns: &[
        col("id"),
        col("name"),
        col("code"),
        col("description"),
        col("price"),
        col("cost"),
        col("stock"),
        col("minStock"),
        col("unit"),
        col("category"),
        col("taxRate"),
        col("isActive"),
        tenant(),
        col("createdAt"),
        col("updatedAt"),
    ],
    dump_all_columns: true,
};

pub const PRODUCT_CATEGORIES: TableSpec = TableSpec {
    name: "product_categories",
    columns: &[
        col("id"),
        col("name"),
        tenant(),
        col("createdAt"),
        col("updatedAt"),
    ],
    dump_all_columns: true,
};

pub const INVOICES: TableSpec = TableSpec {
    name: "invoices",
    columns: &[
        col("id"),
        col("invoiceNumber"),
        tenant(),
        col("customerId"),
        col("issueDate"),
        col("dueDate"),
        col("subtotal"),
        col("taxAmount"),
        col("discountAmount"),
        col("total"),
        col("status"),
        col("notes"),
        col("createdAt"),
        col("updatedAt"),
    ],
    dump_all_columns: true,
};

pub const EXPENSES: TableSpec = TableSpec {
    name: "expenses",
    columns: &[
        col("id"),
        col("expenseNumber"),
        tenant(),
        col("supplierId"),
        col("description"),
        col("expenseDate"),
        col("amount"),
        col("category"),
        col("status"),
        col("notes"),
        col("createdAt"),
        col("updatedAt"),
    ],
    dump_all_columns: true,
};

/// Users of a tenant. Dumped with this exact column list; the two-factor
/// backup codes travel under `backupCodes`.
pub const TENANT_USERS: TableSpec = TableSpec {
    name: USERS_TABLE,
    columns: &[
        col("id"),
        col("email"),
        col("password"),
        col("firstName"),
        col("lastName"),
        col("role"),
        or("isActive", Fallback::Bool(true)),
        col("lastLoginAt"),
        col("lastLoginTimeZone"),
        col("lastLoginUtcOffsetMinutes"),
        col("deletionRequestedAt"),
        or("isPendingDeletion", Fallback::Bool(false)),
        col("twoFactorSecret"),
        or("twoFactorEnabled", Fallback::Bool(false)),
        ColumnSpec {
            column: "twoFactorBackupCodes",
            key: "backupCodes",
            fallback: Fallback::Null,
        },
        col("twoFactorEnabledAt"),
        or("isEmailVerified", Fallback::Bool(false)),
        col("emailVerificationToken"),
        col("emailVerificationSentAt"),
        col("emailVerifiedAt"),
        col("passwordResetToken"),
        col("passwordResetExpiresAt"),
        tenant(),
        col("currentOrgId"),
        col("createdAt"),
        col("updatedAt"),
        or("tokenVersion", Fallback::Int(0)),
        col("notificationPreferences"),
    ],
    dump_all_columns: false,
};

pub const USER_SNAPSHOT_TABLES: &[TableSpec] = &[CUSTOMERS, SUPPLIERS, PRODUCTS, INVOICES, EXPENSES];

pub const TENANT_SNAPSHOT_TABLES: &[TableSpec] = &[
    TENANT_USERS,
    CUSTOMERS,
    SUPPLIERS,
    PRODUCTS,
    PRODUCT_CATEGORIES,
    INVOICES,
    EXPENSES,
];

/// Children before parents.
pub const USER_DELETE_ORDER: &[&str] = &["expenses", "invoices", "products", "suppliers", "customers"];

pub const USER_INSERT_ORDER: &[TableSpec] = &[CUSTOMERS, SUPPLIERS, PRODUCTS, INVOICES, EXPENSES];

/// Children before parents.
pub const TENANT_DELETE_ORDER: &[&str] = &[
    "expenses",
    "invoices",
    "products",
    "product_categories",
    "suppliers",
    "customers",
    USERS_TABLE,
];

pub const TENANT_INSERT_ORDER: &[TableSpec] = &[
    CUSTOMERS,
    SUPPLIERS,
    PRODUCT_CATEGORIES,
    PRODUCTS,
    INVOICES,
    EXPENSES,
    TENANT_USERS,
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_applies_fallbacks() {
        let row = json!({
            "id": "u1",
            "email": "a@b.c",
            "isActive": null,
            "backupCodes": ["x", "y"],
            "unknownColumn": 1
        });

        let record = TENANT_USERS.record_for(row.as_object().unwrap(), "t1");

        assert_eq!(record["isActive"], true);
        assert_eq!(record["isPendingDeletion"], false);
        assert_eq!(record["tokenVersion"], 0);
        assert_eq!(record["tenantId"], "t1");
        assert_eq!(record["twoFactorBackupCodes"], json!(["x", "y"]));
        assert!(record.get("backupCodes").is_none());
        assert!(record.get("unknownColumn").is_none());
        assert_eq!(record["lastName"], Value::Null);
    }

    #[test]
    fn test_row_tenant_wins_over_fallback() {
        let row = json!({ "id": "c1", "tenantId": "other" });
        let record = CUSTOMERS.record_for(row.as_object().unwrap(), "t1");
        assert_eq!(record["tenantId"], "other");
    }

    #[test]
    fn test_delete_and_insert_orders_cover_same_tables() {
        let mut deleted: Vec<&str> = USER_DELETE_ORDER.to_vec();
        let mut inserted: Vec<&str> = USER_INSERT_ORDER.iter().map(|t| t.name).collect();
        deleted.sort_unstable();
        inserted.sort_unstable();
        assert_eq!(deleted, inserted);

        let mut deleted: Vec<&str> = TENANT_DELETE_ORDER.to_vec();
        let mut inserted: Vec<&str> = TENANT_INSERT_ORDER.iter().map(|t| t.name).collect();
        deleted.sort_unstable();
        inserted.sort_unstable();
        assert_eq!(deleted, inserted);
    }

    #[test]
    fn test_parents_inserted_before_children() {
        let position = |name: &str| TENANT_INSERT_ORDER.iter().position(|t| t.name == name).unwrap();
        assert!(position("customers") < position("invoices"));
        assert!(position("suppliers") < position("expenses"));
        assert!(position("product_categories") < position("products"));
    }
}
