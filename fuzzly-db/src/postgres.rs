//! Postgres-backed [`AuthDb`], implementing the schema in §3.1 directly
//! with hand-written `sqlx` queries (§9: no reflective ORM).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::{
    models::{
        BanRow, BanType, BotLoginRow, IpBanRow, LoginLookupRow, OtpRecordRow,
        OtpRecoveryCodeRow, SigningKeyRow,
    },
    AuthDb, DbError,
};

pub struct PostgresDb {
    pool: PgPool,
}

impl PostgresDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::RowNotFound => DbError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::Conflict(db_err.message().to_owned())
        }
        other => DbError::Other(other.to_string()),
    }
}

#[async_trait]
impl AuthDb for PostgresDb {
    async fn insert_signing_key(
        &self,
        algorithm: i16,
        public_key: &[u8],
        signature: &[u8],
        expires: DateTime<Utc>,
    ) -> Result<SigningKeyRow, DbError> {
        let row = sqlx::query(
            "insert into auth.token_keys (algorithm, public_key, signature, expires) \
             values ($1, $2, $3, $4) \
             returning key_id, algorithm, public_key, signature, issued, expires",
        )
        .bind(algorithm)
        .bind(public_key)
        .bind(signature)
        .bind(expires)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(SigningKeyRow {
            key_id: row.try_get("key_id").map_err(map_sqlx_err)?,
            algorithm: row.try_get("algorithm").map_err(map_sqlx_err)?,
            public_key: row.try_get("public_key").map_err(map_sqlx_err)?,
            signature: row.try_get("signature").map_err(map_sqlx_err)?,
            issued: row.try_get("issued").map_err(map_sqlx_err)?,
            expires: row.try_get("expires").map_err(map_sqlx_err)?,
        })
    }

    async fn fetch_signing_key(
        &self,
        algorithm: i16,
        key_id: i64,
    ) -> Result<SigningKeyRow, DbError> {
        let row = sqlx::query(
            "select key_id, algorithm, public_key, signature, issued, expires \
             from auth.token_keys where algorithm = $1 and key_id = $2",
        )
        .bind(algorithm)
        .bind(key_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(SigningKeyRow {
            key_id: row.try_get("key_id").map_err(map_sqlx_err)?,
            algorithm: row.try_get("algorithm").map_err(map_sqlx_err)?,
            public_key: row.try_get("public_key").map_err(map_sqlx_err)?,
            signature: row.try_get("signature").map_err(map_sqlx_err)?,
            issued: row.try_get("issued").map_err(map_sqlx_err)?,
            expires: row.try_get("expires").map_err(map_sqlx_err)?,
        })
    }

    async fn insert_user(
        &self,
        handle: &str,
        name: &str,
        email_hash: &[u8],
        password: &str,
        secret_index: i16,
    ) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query(
            "insert into users (handle, name, mod) values ($1, $2, false) \
             returning user_id",
        )
        .bind(handle)
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let user_id: i64 = row.try_get("user_id").map_err(map_sqlx_err)?;

        sqlx::query(
            "insert into auth.user_login (user_id, email_hash, password, secret) \
             values ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(email_hash)
        .bind(password)
        .bind(secret_index)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(user_id)
    }

    async fn fetch_login_by_email_hash(
        &self,
        email_hash: &[u8],
    ) -> Result<LoginLookupRow, DbError> {
        let row = sqlx::query(
            "select ul.user_id, ul.password, ul.secret, \
                    u.handle, u.name, u.mod, \
                    o.secret as otp_secret, o.nonce as otp_nonce, o.ciphertext as otp_ciphertext \
             from auth.user_login ul \
             join users u on u.user_id = ul.user_id \
             left join auth.otp o on o.user_id = ul.user_id \
             where ul.email_hash = $1",
        )
        .bind(email_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let user_id: i64 = row.try_get("user_id").map_err(map_sqlx_err)?;
        let otp_secret: Option<i16> =
            row.try_get("otp_secret").map_err(map_sqlx_err)?;
        let otp = otp_secret.map(|secret_index| OtpRecordRow {
            user_id,
            secret_index,
            nonce: row.get("otp_nonce"),
            ciphertext: row.get("otp_ciphertext"),
        });

        Ok(LoginLookupRow {
            user_id,
            password: row.try_get("password").map_err(map_sqlx_err)?,
            secret_index: row.try_get("secret").map_err(map_sqlx_err)?,
            handle: row.try_get("handle").map_err(map_sqlx_err)?,
            name: row.try_get("name").map_err(map_sqlx_err)?,
            is_mod: row.try_get("mod").map_err(map_sqlx_err)?,
            otp,
        })
    }

    async fn update_password(
        &self,
        user_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError> {
        sqlx::query(
            "update auth.user_login set password = $2, secret = $3 where user_id = $1",
        )
        .bind(user_id)
        .bind(password)
        .bind(secret_index)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn upsert_bot_login(
        &self,
        user_id: Option<i64>,
        password: &str,
        secret_index: i16,
        bot_type_id: i16,
        created_by: Option<i64>,
    ) -> Result<BotLoginRow, DbError> {
        let row = sqlx::query(
            "insert into auth.bot_login (user_id, password, secret, bot_type_id, created_by) \
             values ($1, $2, $3, $4, $5) \
             on conflict (user_id) where user_id is not null \
             do update set password = excluded.password, secret = excluded.secret \
             returning bot_id, user_id, password, secret, bot_type_id, created_by",
        )
        .bind(user_id)
        .bind(password)
        .bind(secret_index)
        .bind(bot_type_id)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(BotLoginRow {
            bot_id: row.try_get("bot_id").map_err(map_sqlx_err)?,
            user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
            password: row.try_get("password").map_err(map_sqlx_err)?,
            secret_index: row.try_get("secret").map_err(map_sqlx_err)?,
            bot_type_id: row.try_get("bot_type_id").map_err(map_sqlx_err)?,
            created_by: row.try_get("created_by").map_err(map_sqlx_err)?,
        })
    }

    async fn fetch_bot_login(&self, bot_id: i64) -> Result<BotLoginRow, DbError> {
        let row = sqlx::query(
            "select bot_id, user_id, password, secret, bot_type_id, created_by \
             from auth.bot_login where bot_id = $1",
        )
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(BotLoginRow {
            bot_id: row.try_get("bot_id").map_err(map_sqlx_err)?,
            user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
            password: row.try_get("password").map_err(map_sqlx_err)?,
            secret_index: row.try_get("secret").map_err(map_sqlx_err)?,
            bot_type_id: row.try_get("bot_type_id").map_err(map_sqlx_err)?,
            created_by: row.try_get("created_by").map_err(map_sqlx_err)?,
        })
    }

    async fn update_bot_password(
        &self,
        bot_id: i64,
        password: &str,
        secret_index: i16,
    ) -> Result<(), DbError> {
        sqlx::query(
            "update auth.bot_login set password = $2, secret = $3 where bot_id = $1",
        )
        .bind(bot_id)
        .bind(password)
        .bind(secret_index)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn insert_otp_enrollment(
        &self,
        otp: OtpRecordRow,
        codes: Vec<OtpRecoveryCodeRow>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            "insert into auth.otp (user_id, secret, nonce, ciphertext) values ($1, $2, $3, $4)",
        )
        .bind(otp.user_id)
        .bind(otp.secret_index)
        .bind(&otp.nonce)
        .bind(&otp.ciphertext)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        for code in &codes {
            sqlx::query(
                "insert into auth.otp_recovery_code (user_id, key_id, secret, recovery_key) \
                 values ($1, $2, $3, $4)",
            )
            .bind(code.user_id)
            .bind(code.key_id)
            .bind(code.secret_index)
            .bind(&code.recovery_key)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn fetch_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<OtpRecoveryCodeRow, DbError> {
        let row = sqlx::query(
            "select user_id, key_id, secret, recovery_key from auth.otp_recovery_code \
             where user_id = $1 and key_id = $2",
        )
        .bind(user_id)
        .bind(key_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(OtpRecoveryCodeRow {
            user_id: row.try_get("user_id").map_err(map_sqlx_err)?,
            key_id: row.try_get("key_id").map_err(map_sqlx_err)?,
            secret_index: row.try_get("secret").map_err(map_sqlx_err)?,
            recovery_key: row.try_get("recovery_key").map_err(map_sqlx_err)?,
        })
    }

    async fn delete_recovery_code(
        &self,
        user_id: i64,
        key_id: i16,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "delete from auth.otp_recovery_code where user_id = $1 and key_id = $2",
        )
        .bind(user_id)
        .bind(key_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_otp_record(&self, user_id: i64) -> Result<(), DbError> {
        sqlx::query("delete from auth.otp where user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn fetch_active_ban(
        &self,
        user_id: i64,
    ) -> Result<Option<BanRow>, DbError> {
        let row = sqlx::query(
            "select ban_id, ban_type, user_id, created, completed, reason \
             from reporting.bans where user_id = $1 and completed > now() \
             order by completed desc limit 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| {
            let ban_type: i16 = row.try_get("ban_type")?;
            Ok(BanRow {
                ban_id: row.try_get("ban_id")?,
                ban_type: if ban_type == 1 { BanType::Ip } else { BanType::User },
                user_id: row.try_get("user_id")?,
                created: row.try_get("created")?,
                completed: row.try_get("completed")?,
                reason: row.try_get("reason")?,
            })
        })
        .transpose()
        .map_err(map_sqlx_err)
    }

    async fn fetch_ip_ban(
        &self,
        ip_hash: &[u8],
    ) -> Result<Option<IpBanRow>, DbError> {
        let row = sqlx::query(
            "select ip_hash, ban_id from reporting.ip_bans where ip_hash = $1",
        )
        .bind(ip_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|row| {
            Ok(IpBanRow {
                ip_hash: row.try_get("ip_hash")?,
                ban_id: row.try_get("ban_id")?,
            })
        })
        .transpose()
        .map_err(map_sqlx_err)
    }

    async fn insert_ip_ban(
        &self,
        ip_hash: &[u8],
        ban_id: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "insert into reporting.ip_bans (ip_hash, ban_id) values ($1, $2) \
             on conflict (ip_hash) do update set ban_id = excluded.ban_id",
        )
        .bind(ip_hash)
        .bind(ban_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}
