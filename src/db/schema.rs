use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Orders (one per purchase attempt, never deleted)
        -- status moves only along the order state graph; see OrderStatus
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            venue_id TEXT NOT NULL,
            sku TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'thb',
            status TEXT NOT NULL CHECK (status IN ('pending', 'pending_review', 'paid', 'rejected', 'refunded', 'error')),
            status_reason TEXT,
            payment_method TEXT NOT NULL CHECK (payment_method IN ('bank_transfer', 'stripe')),
            slip_url TEXT,
            visitor_id TEXT,
            buyer_profile TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            slip_image_hash TEXT,
            slip_text_hash TEXT,
            provider_session_id TEXT UNIQUE,
            provider_payment_intent TEXT,
            provider_subscription_id TEXT,
            subscription_status TEXT,
            partner_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_venue ON orders(venue_id);
        -- Duplicate guard lookups. Not unique: two concurrent submissions of one
        -- slip can both pass the check.
        CREATE INDEX IF NOT EXISTS idx_orders_image_hash ON orders(slip_image_hash, created_at) WHERE slip_image_hash IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_text_hash ON orders(slip_text_hash, created_at) WHERE slip_text_hash IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_payment_intent ON orders(provider_payment_intent) WHERE provider_payment_intent IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_orders_subscription ON orders(provider_subscription_id) WHERE provider_subscription_id IS NOT NULL;

        -- Webhook idempotency ledger. Row existence = seen; processed_at NULL = not yet applied.
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider_event_id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            processed_at INTEGER
        );

        -- Entitlements (append-only, one per order + feature)
        CREATE TABLE IF NOT EXISTS entitlements (
            id TEXT PRIMARY KEY,
            venue_id TEXT NOT NULL,
            order_id TEXT NOT NULL REFERENCES orders(id),
            feature TEXT NOT NULL CHECK (feature IN ('glow', 'boost', 'giant', 'verified')),
            sku TEXT NOT NULL,
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(order_id, feature)
        );
        CREATE INDEX IF NOT EXISTS idx_entitlements_venue ON entitlements(venue_id, ends_at);

        -- Provider subscription mirror
        CREATE TABLE IF NOT EXISTS subscriptions (
            provider_subscription_id TEXT PRIMARY KEY,
            venue_id TEXT NOT NULL,
            order_id TEXT,
            status TEXT NOT NULL,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            current_period_end INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_venue ON subscriptions(venue_id);

        -- Partner attribution (first attributed order wins)
        CREATE TABLE IF NOT EXISTS partner_referrals (
            partner_id TEXT NOT NULL,
            venue_id TEXT NOT NULL,
            first_order_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (partner_id, venue_id)
        );

        -- Commission ledger (append-only; refunds add clawback rows)
        CREATE TABLE IF NOT EXISTS commission_ledger (
            id TEXT PRIMARY KEY,
            partner_id TEXT NOT NULL,
            order_id TEXT NOT NULL REFERENCES orders(id),
            venue_id TEXT NOT NULL,
            entry_type TEXT NOT NULL CHECK (entry_type IN ('accrual', 'clawback')),
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            UNIQUE(order_id, partner_id, entry_type)
        );
        CREATE INDEX IF NOT EXISTS idx_commission_partner ON commission_ledger(partner_id);

        -- Append-only guard: ledger rows are never rewritten
        CREATE TRIGGER IF NOT EXISTS commission_ledger_no_update
        BEFORE UPDATE ON commission_ledger
        BEGIN
            SELECT RAISE(ABORT, 'commission_ledger is append-only');
        END;
        "#,
    )
}
