use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::checked_span;
use super::{Engine, EngineError};

// ── Social area ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSocialEvent {
    pub id: Ulid,
    pub client_name: Option<String>,
    pub event_date: Option<Ms>,
    pub starts_at: Option<Ms>,
    pub ends_at: Option<Ms>,
    pub usage: Option<String>,
    pub attendee_limit: Option<u32>,
    pub area: Option<String>,
    pub amount: Option<Cents>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialEventPatch {
    pub client_name: Option<String>,
    pub event_date: Option<Ms>,
    pub starts_at: Option<Ms>,
    pub ends_at: Option<Ms>,
    pub usage: Option<Option<String>>,
    pub attendee_limit: Option<Option<u32>>,
    pub area: Option<String>,
    pub amount: Option<Cents>,
    pub status: Option<BookingStatus>,
}

// ── Menu ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMenuItem {
    pub id: Ulid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Cents>,
    pub category_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuItemPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub price: Option<Cents>,
    pub category_id: Option<Ulid>,
}

// ── Payment config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentConfigPatch {
    pub bank: Option<String>,
    pub account_number: Option<String>,
    pub clabe: Option<String>,
    pub whatsapp_url: Option<String>,
}

fn required_text(value: Option<String>, field: &str) -> Result<String, EngineError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    bounded(&value, MAX_NAME_LEN, field)?;
    Ok(value)
}

fn bounded(value: &str, max: usize, field: &str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::Validation(format!("{field} is longer than {max} bytes")));
    }
    Ok(())
}

fn non_negative(amount: Cents, field: &str) -> Result<Cents, EngineError> {
    if amount < 0 {
        return Err(EngineError::Validation(format!("{field} must not be negative")));
    }
    Ok(amount)
}

/// An event window needs both ends.
fn window(starts_at: Option<Ms>, ends_at: Option<Ms>) -> Result<Option<Span>, EngineError> {
    match (starts_at, ends_at) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => checked_span(start, end).map(Some),
        _ => Err(EngineError::Validation(
            "event window needs both starts_at and ends_at".into(),
        )),
    }
}

impl Engine {
    fn check_catalog_capacity<V>(&self, map: &dashmap::DashMap<Ulid, V>, what: &'static str) -> Result<(), EngineError> {
        if map.len() >= MAX_CATALOG_ENTRIES {
            return Err(EngineError::LimitExceeded(what));
        }
        Ok(())
    }

    // ── Social events ────────────────────────────────────────────

    pub async fn create_social_event(&self, new: NewSocialEvent) -> Result<SocialEvent, EngineError> {
        let client_name = required_text(new.client_name, "client_name")?;
        let event_date = new
            .event_date
            .ok_or_else(|| EngineError::Validation("event_date is required".into()))?;
        let amount = non_negative(
            new.amount
                .ok_or_else(|| EngineError::Validation("amount is required".into()))?,
            "amount",
        )?;
        let window = window(new.starts_at, new.ends_at)?;
        if let Some(usage) = &new.usage {
            bounded(usage, MAX_TEXT_LEN, "usage")?;
        }
        let area = match new.area {
            Some(area) => required_text(Some(area), "area")?,
            None => DEFAULT_EVENT_AREA.to_string(),
        };

        let _catalog = self.catalog_lock.lock().await;
        self.check_catalog_capacity(&self.social_events, "too many events")?;
        if self.social_events.contains_key(&new.id) {
            return Err(EngineError::Conflict(format!("event {} already exists", new.id)));
        }
        let event = SocialEvent {
            id: new.id,
            client_name,
            event_date,
            window,
            usage: new.usage,
            attendee_limit: new.attendee_limit,
            area,
            amount,
            status: new.status.unwrap_or(BookingStatus::Pending),
        };
        self.persist_catalog(Event::SocialEventSaved {
            event: event.clone(),
        })
        .await?;
        Ok(event)
    }

    pub async fn update_social_event(
        &self,
        id: Ulid,
        patch: SocialEventPatch,
    ) -> Result<SocialEvent, EngineError> {
        if patch == SocialEventPatch::default() {
            return Err(EngineError::Validation("no event fields to update".into()));
        }
        let _catalog = self.catalog_lock.lock().await;
        let mut event = self
            .social_events
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("event", id))?;

        if let Some(status) = patch.status {
            if !event.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    from: event.status,
                    to: status,
                });
            }
            event.status = status;
        }
        if let Some(name) = patch.client_name {
            event.client_name = required_text(Some(name), "client_name")?;
        }
        if let Some(date) = patch.event_date {
            event.event_date = date;
        }
        if patch.starts_at.is_some() || patch.ends_at.is_some() {
            event.window = window(
                patch.starts_at.or(event.window.map(|w| w.start)),
                patch.ends_at.or(event.window.map(|w| w.end)),
            )?;
        }
        if let Some(usage) = patch.usage {
            if let Some(u) = &usage {
                bounded(u, MAX_TEXT_LEN, "usage")?;
            }
            event.usage = usage;
        }
        if let Some(limit) = patch.attendee_limit {
            event.attendee_limit = limit;
        }
        if let Some(area) = patch.area {
            event.area = required_text(Some(area), "area")?;
        }
        if let Some(amount) = patch.amount {
            event.amount = non_negative(amount, "amount")?;
        }

        self.persist_catalog(Event::SocialEventSaved {
            event: event.clone(),
        })
        .await?;
        Ok(event)
    }

    pub async fn delete_social_event(&self, id: Ulid) -> Result<SocialEvent, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let event = self
            .social_events
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("event", id))?;
        self.persist_catalog(Event::SocialEventDeleted { id }).await?;
        Ok(event)
    }

    /// Events sorted by date.
    pub fn list_social_events(&self) -> Vec<SocialEvent> {
        let mut events: Vec<SocialEvent> = self.social_events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| (e.event_date, e.id));
        events
    }

    // ── Menu ─────────────────────────────────────────────────────

    pub async fn create_category(&self, id: Ulid, name: Option<String>) -> Result<MenuCategory, EngineError> {
        let name = required_text(name, "name")?;
        let _catalog = self.catalog_lock.lock().await;
        self.check_catalog_capacity(&self.categories, "too many categories")?;
        let taken = self
            .categories
            .iter()
            .any(|c| c.id == id || c.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(EngineError::Conflict(format!("category \"{name}\" already exists")));
        }
        let category = MenuCategory { id, name };
        self.persist_catalog(Event::CategoryCreated {
            category: category.clone(),
        })
        .await?;
        Ok(category)
    }

    /// Categories sorted by name.
    pub fn list_categories(&self) -> Vec<MenuCategory> {
        let mut categories: Vec<MenuCategory> = self.categories.iter().map(|e| e.value().clone()).collect();
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        categories
    }

    fn require_category(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound("category", id));
        }
        Ok(())
    }

    pub async fn create_menu_item(&self, new: NewMenuItem) -> Result<MenuItem, EngineError> {
        let name = required_text(new.name, "name")?;
        let price = non_negative(
            new.price
                .ok_or_else(|| EngineError::Validation("price is required".into()))?,
            "price",
        )?;
        let category_id = new
            .category_id
            .ok_or_else(|| EngineError::Validation("category_id is required".into()))?;
        if let Some(d) = &new.description {
            bounded(d, MAX_TEXT_LEN, "description")?;
        }

        let _catalog = self.catalog_lock.lock().await;
        self.check_catalog_capacity(&self.menu_items, "too many menu items")?;
        self.require_category(category_id)?;
        if self.menu_items.contains_key(&new.id) {
            return Err(EngineError::Conflict(format!("menu item {} already exists", new.id)));
        }
        let item = MenuItem {
            id: new.id,
            name,
            description: new.description,
            price,
            category_id,
        };
        self.persist_catalog(Event::MenuItemSaved { item: item.clone() })
            .await?;
        Ok(item)
    }

    pub async fn update_menu_item(&self, id: Ulid, patch: MenuItemPatch) -> Result<MenuItem, EngineError> {
        if patch == MenuItemPatch::default() {
            return Err(EngineError::Validation("no menu item fields to update".into()));
        }
        let _catalog = self.catalog_lock.lock().await;
        let mut item = self
            .menu_items
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("menu item", id))?;
        if let Some(category_id) = patch.category_id {
            self.require_category(category_id)?;
            item.category_id = category_id;
        }
        if let Some(name) = patch.name {
            item.name = required_text(Some(name), "name")?;
        }
        if let Some(description) = patch.description {
            if let Some(d) = &description {
                bounded(d, MAX_TEXT_LEN, "description")?;
            }
            item.description = description;
        }
        if let Some(price) = patch.price {
            item.price = non_negative(price, "price")?;
        }
        self.persist_catalog(Event::MenuItemSaved { item: item.clone() })
            .await?;
        Ok(item)
    }

    pub async fn delete_menu_item(&self, id: Ulid) -> Result<MenuItem, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let item = self
            .menu_items
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("menu item", id))?;
        self.persist_catalog(Event::MenuItemDeleted { id }).await?;
        Ok(item)
    }

    /// Items sorted by name, optionally restricted to one category.
    pub fn list_menu_items(&self, category_id: Option<Ulid>) -> Result<Vec<MenuItem>, EngineError> {
        if let Some(cid) = category_id {
            self.require_category(cid)?;
        }
        let mut items: Vec<MenuItem> = self
            .menu_items
            .iter()
            .filter(|e| category_id.is_none_or(|cid| e.category_id == cid))
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    // ── Payment config ───────────────────────────────────────────

    pub async fn payment_config(&self) -> PaymentConfig {
        self.payment_config.read().await.clone()
    }

    pub async fn update_payment_config(&self, patch: PaymentConfigPatch) -> Result<PaymentConfig, EngineError> {
        if patch == PaymentConfigPatch::default() {
            return Err(EngineError::Validation("no payment fields to update".into()));
        }
        let _catalog = self.catalog_lock.lock().await;
        let mut config = self.payment_config.read().await.clone();
        if let Some(bank) = patch.bank {
            config.bank = required_text(Some(bank), "bank")?;
        }
        if let Some(account) = patch.account_number {
            config.account_number = required_text(Some(account), "account_number")?;
        }
        if let Some(clabe) = patch.clabe {
            config.clabe = required_text(Some(clabe), "clabe")?;
        }
        if let Some(url) = patch.whatsapp_url {
            let url = required_text(Some(url), "whatsapp_url")?;
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(EngineError::Validation(format!("whatsapp_url must be an http(s) URL: {url}")));
            }
            config.whatsapp_url = url;
        }
        self.persist_catalog(Event::PaymentConfigSet {
            config: config.clone(),
        })
        .await?;
        Ok(config)
    }
}
