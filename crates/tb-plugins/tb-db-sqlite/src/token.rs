//! Invitation tokens.

use tb_core::error::{ErrorKind, Result};
use tb_core::models::Token;
use tb_core::permission::Permission;

use crate::rows::{self, DbResultExt, TOKEN_COLUMNS};
use crate::transaction::Transaction;

impl Transaction<'_> {
    /// Issues a token good for `uses` sign-ups (`-1` for unlimited).
    pub async fn create_token(&mut self, uses: i64) -> Result<Token> {
        let max = self.config().max_token_uses;
        if uses == 0 || uses < Token::UNLIMITED || uses > max {
            return Err(ErrorKind::OverUseLimit.with_context(format!("{uses} uses (max {max})")));
        }
        if uses == Token::UNLIMITED {
            self.has_permission(Permission::Owner, true).await?;
        } else {
            self.has_permission(Permission::Administrator, true).await?;
        }
        let creator = self.require_signed_in()?;

        let token = Token {
            token: self.credentials().generate_token()?,
            creator,
            remaining: uses,
        };
        sqlx::query("INSERT INTO tokens (token, creator, remaining) VALUES (?, ?, ?)")
            .bind(&token.token)
            .bind(&token.creator)
            .bind(token.remaining)
            .execute(self.conn())
            .await
            .db("insert token")?;
        tracing::info!(creator = %token.creator, uses, "token created");
        Ok(token)
    }

    /// Consumes one use. Decrement and lookup are single statements so
    /// concurrent sign-ups can never both take the last use.
    pub(crate) async fn use_token(&mut self, token: &str) -> Result<()> {
        let left: Option<i64> = sqlx::query_scalar(
            "UPDATE tokens SET remaining = remaining - 1 \
             WHERE token = ? AND remaining > 0 \
             RETURNING remaining",
        )
        .bind(token)
        .fetch_optional(self.conn())
        .await
        .db("consume token")?;

        match left {
            Some(0) => {
                sqlx::query("DELETE FROM tokens WHERE token = ? AND remaining = 0")
                    .bind(token)
                    .execute(self.conn())
                    .await
                    .db("retire token")?;
                tracing::debug!("token used up");
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                let remaining: Option<i64> =
                    sqlx::query_scalar("SELECT remaining FROM tokens WHERE token = ?")
                        .bind(token)
                        .fetch_optional(self.conn())
                        .await
                        .db("look up token")?;
                if remaining == Some(Token::UNLIMITED) {
                    Ok(())
                } else {
                    Err(ErrorKind::UnknownToken.into())
                }
            }
        }
    }

    /// Revokes a token; the creator stands in as the target user.
    pub async fn delete_token(&mut self, token: &str) -> Result<()> {
        let creator: String = sqlx::query_scalar("SELECT creator FROM tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(self.conn())
            .await
            .db("look up token")?
            .ok_or(ErrorKind::UnknownToken)?;

        self.has_perm_over_user(Permission::Administrator, &creator)
            .await?;

        let deleted = sqlx::query("DELETE FROM tokens WHERE token = ?")
            .bind(token)
            .execute(self.conn())
            .await
            .db("delete token")?
            .rows_affected();
        if deleted == 0 {
            return Err(ErrorKind::UnknownToken.into());
        }
        Ok(())
    }

    /// Owner sees every token, administrators only their own.
    pub async fn list_tokens(&mut self) -> Result<Vec<Token>> {
        self.has_permission(Permission::Administrator, true).await?;
        let all = self.permission().await? == Permission::Owner;

        let found = if all {
            let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY creator, token");
            sqlx::query(&sql).fetch_all(self.conn()).await
        } else {
            let creator = self.require_signed_in()?;
            let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE creator = ? ORDER BY token");
            sqlx::query(&sql).bind(creator).fetch_all(self.conn()).await
        }
        .db("list tokens")?;

        found.iter().map(rows::token).collect()
    }
}
