//! `POST /register` and `POST /login` against the `users` table, exercising the DB pool's
//! non-blocking acquisition discipline end-to-end.

use mysql::prelude::Queryable;
use tracing::warn;

use crate::error::PoolError;
use crate::http::{Response, Status, Version};
use crate::pool::DbPool;

#[derive(Debug, serde::Deserialize)]
struct Credentials {
    user: String,
    pwd: String,
}

pub fn register(db: &DbPool, version: Version, body: &[u8]) -> Response {
    let Ok(creds) = serde_json::from_slice::<Credentials>(body) else {
        return bad_request(version);
    };

    let mut conn = match db.try_acquire() {
        Ok(conn) => conn,
        Err(PoolError::Busy) => return service_unavailable(version),
        Err(PoolError::Closed) => return service_unavailable(version),
    };

    let existing: Option<u64> = conn
        .exec_first(
            "SELECT id FROM users WHERE username = ?",
            (creds.user.clone(),),
        )
        .unwrap_or(None);
    if existing.is_some() {
        return Response::new(version, Status::Conflict)
            .with_body("text/plain", b"username taken".to_vec());
    }

    match conn.exec_drop(
        "INSERT INTO users (username, password) VALUES (?, ?)",
        (creds.user, creds.pwd),
    ) {
        Ok(()) => Response::new(version, Status::Ok).with_body("text/plain", b"registered".to_vec()),
        Err(e) => {
            warn!(error = %e, "register insert failed");
            Response::new(version, Status::InternalServerError)
        }
    }
}

pub fn login(db: &DbPool, version: Version, body: &[u8]) -> Response {
    let Ok(creds) = serde_json::from_slice::<Credentials>(body) else {
        return bad_request(version);
    };

    let mut conn = match db.try_acquire() {
        Ok(conn) => conn,
        Err(PoolError::Busy) => return service_unavailable(version),
        Err(PoolError::Closed) => return service_unavailable(version),
    };

    let stored: Option<String> = conn
        .exec_first(
            "SELECT password FROM users WHERE username = ?",
            (creds.user,),
        )
        .unwrap_or(None);

    match stored {
        Some(pwd) if pwd == creds.pwd => {
            Response::new(version, Status::Ok).with_body("text/plain", b"ok".to_vec())
        }
        _ => Response::new(version, Status::Unauthorized)
            .with_body("text/plain", b"invalid credentials".to_vec()),
    }
}

fn bad_request(version: Version) -> Response {
    Response::new(version, Status::BadRequest).with_body("text/plain", b"malformed body".to_vec())
}

fn service_unavailable(version: Version) -> Response {
    Response::new(version, Status::ServiceUnavailable)
        .with_body("text/plain", b"database busy".to_vec())
}
