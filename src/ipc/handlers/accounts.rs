use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_str, get_required_text, is_constraint_violation,
    resolve_caller, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::scope;
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const ROLES: [&str; 5] = ["admin", "principal", "teacher", "parent", "student"];

fn valid_role(role: &str) -> bool {
    ROLES.contains(&role)
}

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn accounts_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_text(params, "email")?;
    let password = get_required_text(params, "password")?;
    let role = get_required_text(params, "role")?;
    if !valid_role(&role) {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", role)));
    }

    // A registration without a school account creates the school root
    // itself; everything else hangs off an existing root's tenant.
    let school_id = match get_optional_str(params, "schoolAccountId")? {
        Some(school_account_id) => {
            let tenant = scope::resolve_tenant(conn, &school_account_id)
                .map_err(|e| db_err("db_query_failed", e))?
                .ok_or_else(|| HandlerErr::not_found("school account not found"))?;
            Some(tenant)
        }
        None => {
            if role != "admin" {
                return Err(HandlerErr::validation(
                    "a school account must be registered with role admin",
                ));
            }
            None
        }
    };

    let account_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO accounts(id, email, password_digest, role, school_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &account_id,
            &email,
            &password_digest(&password),
            &role,
            &school_id,
            &created_at,
        ),
    );
    if let Err(e) = inserted {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::validation("email already registered"));
        }
        return Err(db_err("db_insert_failed", e));
    }

    let tenant_id = school_id.unwrap_or_else(|| account_id.clone());
    Ok(json!({
        "accountId": account_id,
        "email": email,
        "role": role,
        "tenantId": tenant_id
    }))
}

fn accounts_resolve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (account_id, tenant_id) = resolve_caller(conn, params)?;
    let (email, role, is_root): (String, String, bool) = conn
        .query_row(
            "SELECT email, role, school_id IS NULL FROM accounts WHERE id = ?",
            [&account_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    Ok(json!({
        "accountId": account_id,
        "email": email,
        "role": role,
        "tenantId": tenant_id,
        "isRoot": is_root
    }))
}

fn accounts_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let role = get_optional_str(params, "role")?;
    if let Some(role) = role.as_deref() {
        if !valid_role(role) {
            return Err(HandlerErr::bad_params(format!("unknown role: {}", role)));
        }
    }

    let accounts = scope::list_sibling_accounts(conn, &tenant_id, role.as_deref())
        .map_err(|e| db_err("db_query_failed", e))?;
    let accounts_json: Vec<serde_json::Value> = accounts
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "email": a.email,
                "role": a.role,
                "isRoot": a.is_root
            })
        })
        .collect();
    Ok(json!({ "accounts": accounts_json }))
}

fn accounts_set_password(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let account_id = get_required_str(params, "accountId")?;
    let password = get_required_text(params, "password")?;
    let changed = conn
        .execute(
            "UPDATE accounts SET password_digest = ? WHERE id = ?",
            (&password_digest(&password), &account_id),
        )
        .map_err(|e| db_err("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("account not found"));
    }
    Ok(json!({ "ok": true }))
}

fn accounts_set_role(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (_account_id, tenant_id) = resolve_caller(conn, params)?;
    let target_id = get_required_str(params, "targetAccountId")?;
    let role = get_required_text(params, "role")?;
    if !valid_role(&role) {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", role)));
    }

    // The target must sit inside the caller's tenant; a foreign id is
    // reported exactly like a missing one.
    let target_tenant = scope::resolve_tenant(conn, &target_id)
        .map_err(|e| db_err("db_query_failed", e))?;
    if target_tenant.as_deref() != Some(tenant_id.as_str()) {
        return Err(HandlerErr::not_found("account not found"));
    }

    conn.execute(
        "UPDATE accounts SET role = ? WHERE id = ?",
        (&role, &target_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.register" => Some(with_db(state, req, accounts_register)),
        "accounts.resolve" => Some(with_db(state, req, accounts_resolve)),
        "accounts.list" => Some(with_db(state, req, accounts_list)),
        "accounts.setPassword" => Some(with_db(state, req, accounts_set_password)),
        "accounts.setRole" => Some(with_db(state, req, accounts_set_role)),
        _ => None,
    }
}
