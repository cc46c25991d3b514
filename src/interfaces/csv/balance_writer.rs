use crate::domain::currency::UserId;
use serde::Serialize;
use std::io::Write;

/// Final balances of one user, one column per currency kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBalances {
    pub user: UserId,
    pub paid: i64,
    pub free: i64,
}

pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header followed by one row per user, in the order given.
    pub fn write_balances<I>(&mut self, rows: I) -> Result<(), csv::Error>
    where
        I: IntoIterator<Item = UserBalances>,
    {
        let mut wrote_any = false;
        for row in rows {
            self.writer.serialize(row)?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record(["user", "paid", "free"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
