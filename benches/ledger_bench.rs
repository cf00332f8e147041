use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dompet::Ledger;
use dompet_core::{AccountId, Kind, StorageBackend, TransactionDraft, TransactionFilter};
use dompet_memory::InMemoryStorage;
use dompet_sqlite::SqliteStorage;
use rust_decimal::Decimal;
use time::macros::datetime;

fn draft(account_id: AccountId, amount: i64, kind: Kind) -> TransactionDraft {
    TransactionDraft {
        account_id,
        category_id: None,
        date: datetime!(2023-02-01 9:00),
        description: Some("Bench".to_string()),
        amount: Decimal::from(amount),
        kind,
    }
}

fn backends() -> Vec<(&'static str, Arc<dyn StorageBackend>)> {
    vec![
        ("memory", Arc::new(InMemoryStorage::new())),
        ("sqlite", Arc::new(SqliteStorage::new(":memory:").unwrap())),
    ]
}

fn seed_data(ledger: &Ledger) -> AccountId {
    let bank = ledger.create_account("Bank", Some(Decimal::from(100_000))).unwrap();
    let food = ledger.create_category("Food", Kind::Expense).unwrap();

    // 100 categorized expenses spread over the month
    for i in 0..100 {
        let mut d = draft(bank, 10 + i, Kind::Expense);
        d.category_id = Some(food);
        d.date = datetime!(2023-02-01 0:00) + time::Duration::hours(i * 6);
        ledger.create_transaction(&d).unwrap();
    }
    bank
}

fn bench_transaction_create(c: &mut Criterion) {
    for (name, storage) in backends() {
        let ledger = Ledger::new(storage);
        let bank = ledger.create_account("Bank", None).unwrap();

        c.bench_function(&format!("{}_transaction_create", name), |b| {
            b.iter(|| ledger.create_transaction(black_box(&draft(bank, 1000, Kind::Income))).unwrap())
        });
    }
}

fn bench_transaction_update(c: &mut Criterion) {
    for (name, storage) in backends() {
        let ledger = Ledger::new(storage);
        let a = ledger.create_account("A", None).unwrap();
        let b = ledger.create_account("B", None).unwrap();
        let id = ledger.create_transaction(&draft(a, 1000, Kind::Expense)).unwrap();

        let mut flip = false;
        c.bench_function(&format!("{}_transaction_move", name), |bench| {
            bench.iter(|| {
                flip = !flip;
                let target = if flip { b } else { a };
                ledger.update_transaction(id, black_box(&draft(target, 1000, Kind::Expense))).unwrap()
            })
        });
    }
}

fn bench_reports(c: &mut Criterion) {
    for (name, storage) in backends() {
        let ledger = Ledger::new(storage);
        let bank = seed_data(&ledger);
        let filter = TransactionFilter::for_account(bank);
        let today = time::macros::date!(2023-02-15);

        c.bench_function(&format!("{}_list_transactions", name), |b| {
            b.iter(|| ledger.list_transactions(black_box(&filter)).unwrap())
        });
        c.bench_function(&format!("{}_monthly_summary", name), |b| {
            b.iter(|| ledger.monthly_summary(black_box(today)).unwrap())
        });
        c.bench_function(&format!("{}_verify_balances", name), |b| {
            b.iter(|| ledger.verify_balances().unwrap())
        });
    }
}

criterion_group!(benches, bench_transaction_create, bench_transaction_update, bench_reports);
criterion_main!(benches);
