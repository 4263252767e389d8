//! Page State Registry.
//!
//! Owns the [`Page`] record of every monitored page for one run. Pages are
//! keyed by their aligned base address, so any address inside a page resolves
//! to the same record. The registry is only mutated from the fault-handling
//! context, and never allocates after registration.

use crate::error::{OracleError, Result};
use crate::page::{Page, PageAddr, Protection, Role};
use crate::platform::ProtectionControl;
use crate::util::PAGE_SIZE;
use log::{debug, warn};
use std::collections::BTreeMap;

/// Registry of monitored pages.
#[derive(Debug, Default)]
pub struct Registry {
    pages: BTreeMap<PageAddr, Page>,
    code: [Option<PageAddr>; 3],
}

fn code_slot(role: Role) -> Option<usize> {
    match role {
        Role::Data => None,
        Role::CodeSquare => Some(0),
        Role::CodeMultiply => Some(1),
        Role::CodeModpow => Some(2),
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the page containing `address`.
    ///
    /// The page starts with `initial` protection, which is applied to the
    /// platform by [`Registry::apply_all`]. It is restored to the role's
    /// resting protection at the end of the run.
    ///
    /// # Errors
    ///
    /// * [`OracleError::DuplicatePage`] if the page is already registered
    /// * [`OracleError::DuplicateRole`] if `role` is a code role that already has a page
    pub fn register(&mut self, address: usize, role: Role, initial: Protection) -> Result<Page> {
        let base = PageAddr::containing(address);
        if self.pages.contains_key(&base) {
            return Err(OracleError::DuplicatePage(base));
        }
        if let Some(slot) = code_slot(role) {
            if self.code[slot].is_some() {
                return Err(OracleError::DuplicateRole(role));
            }
            self.code[slot] = Some(base);
        }
        let page = Page {
            base,
            protection: initial,
            role,
            restore: role.resting_protection(),
        };
        debug!("Registered {} page {} ({})", role, base, initial);
        self.pages.insert(base, page);
        Ok(page)
    }

    /// Returns the page owning `address`.
    ///
    /// # Errors
    ///
    /// [`OracleError::UnknownPage`] if no registered page contains `address`.
    /// The error's trace length is zero; see [`OracleError::with_trace_len`].
    pub fn lookup(&self, address: usize) -> Result<&Page> {
        self.pages
            .get(&PageAddr::containing(address))
            .ok_or(OracleError::UnknownPage {
                address,
                trace_len: 0,
            })
    }

    /// Returns the page registered for a code role.
    pub fn page_for(&self, role: Role) -> Option<&Page> {
        code_slot(role)
            .and_then(|slot| self.code[slot])
            .and_then(|base| self.pages.get(&base))
    }

    /// Like [`Registry::page_for`], failing with [`OracleError::MissingRole`].
    pub fn require(&self, role: Role) -> Result<&Page> {
        self.page_for(role).ok_or(OracleError::MissingRole(role))
    }

    /// Changes the protection of the page owning `address`.
    ///
    /// The record is only updated once the platform accepted the change.
    pub fn set_permission<P: ProtectionControl + ?Sized>(
        &mut self,
        protector: &P,
        address: usize,
        protection: Protection,
    ) -> Result<()> {
        let base = PageAddr::containing(address);
        let page = self.pages.get_mut(&base).ok_or(OracleError::UnknownPage {
            address,
            trace_len: 0,
        })?;
        protector
            .set_protection(base, PAGE_SIZE, protection)
            .map_err(|source| OracleError::PermissionChangeFailed {
                page: base,
                protection,
                source,
            })?;
        page.protection = protection;
        Ok(())
    }

    /// Applies the recorded protection of every page to the platform.
    pub fn apply_all<P: ProtectionControl + ?Sized>(&mut self, protector: &P) -> Result<()> {
        for page in self.pages.values() {
            protector
                .set_protection(page.base, PAGE_SIZE, page.protection)
                .map_err(|source| OracleError::PermissionChangeFailed {
                    page: page.base,
                    protection: page.protection,
                    source,
                })?;
        }
        Ok(())
    }

    /// Restores every page to its resting protection.
    ///
    /// Every page is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn restore_all<P: ProtectionControl + ?Sized>(&mut self, protector: &P) -> Result<()> {
        let mut first_error = None;
        for page in self.pages.values_mut() {
            match protector.set_protection(page.base, PAGE_SIZE, page.restore) {
                Ok(()) => page.protection = page.restore,
                Err(source) => {
                    warn!("Failed to restore {}: {}", page.base, source);
                    if first_error.is_none() {
                        first_error = Some(OracleError::PermissionChangeFailed {
                            page: page.base,
                            protection: page.restore,
                            source,
                        });
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Iterates over all pages in address order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// Number of registered pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if no page is registered.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::RecordingProtector;

    const BASE: usize = 0x10_0000;

    #[test]
    fn test_lookup_resolves_interior_addresses() {
        let mut registry = Registry::new();
        registry
            .register(BASE + 8, Role::Data, Protection::NONE)
            .expect("register");
        let page = registry.lookup(BASE + PAGE_SIZE - 1).expect("lookup");
        assert_eq!(page.base.as_usize(), BASE);
        assert_eq!(page.restore, Protection::READ | Protection::WRITE);
        assert!(matches!(
            registry.lookup(BASE + PAGE_SIZE),
            Err(OracleError::UnknownPage { address, .. }) if address == BASE + PAGE_SIZE
        ));
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut registry = Registry::new();
        registry
            .register(BASE, Role::CodeSquare, Protection::NONE)
            .expect("register");
        assert!(matches!(
            registry.register(BASE + 4, Role::Data, Protection::NONE),
            Err(OracleError::DuplicatePage(_))
        ));
        assert!(matches!(
            registry.register(BASE + PAGE_SIZE, Role::CodeSquare, Protection::NONE),
            Err(OracleError::DuplicateRole(Role::CodeSquare))
        ));
        // many data pages are fine
        registry
            .register(BASE + PAGE_SIZE, Role::Data, Protection::NONE)
            .expect("data page");
        registry
            .register(BASE + 2 * PAGE_SIZE, Role::Data, Protection::NONE)
            .expect("data page");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_page_for_code_roles() {
        let mut registry = Registry::new();
        registry
            .register(BASE, Role::CodeModpow, Protection::NONE)
            .expect("register");
        assert_eq!(
            registry.page_for(Role::CodeModpow).map(|p| p.base.as_usize()),
            Some(BASE)
        );
        assert!(registry.page_for(Role::Data).is_none());
        assert!(matches!(
            registry.require(Role::CodeSquare),
            Err(OracleError::MissingRole(Role::CodeSquare))
        ));
    }

    #[test]
    fn test_set_permission_updates_record_and_platform() {
        let protector = RecordingProtector::default();
        let mut registry = Registry::new();
        registry
            .register(BASE, Role::CodeModpow, Protection::NONE)
            .expect("register");
        registry
            .set_permission(&protector, BASE + 0x10, Protection::EXEC)
            .expect("set");
        assert_eq!(
            registry.lookup(BASE).expect("lookup").protection,
            Protection::EXEC
        );
        assert_eq!(
            protector.calls.borrow().as_slice(),
            &[(PageAddr::containing(BASE), Protection::EXEC)]
        );
    }

    #[test]
    fn test_refused_change_keeps_record() {
        let protector = RecordingProtector {
            refuse: Some(PageAddr::containing(BASE)),
            ..Default::default()
        };
        let mut registry = Registry::new();
        registry
            .register(BASE, Role::Data, Protection::NONE)
            .expect("register");
        let err = registry
            .set_permission(&protector, BASE, Protection::READ)
            .expect_err("refused");
        assert!(matches!(err, OracleError::PermissionChangeFailed { .. }));
        assert_eq!(
            registry.lookup(BASE).expect("lookup").protection,
            Protection::NONE
        );
    }

    #[test]
    fn test_restore_all_attempts_every_page() {
        let protector = RecordingProtector {
            refuse: Some(PageAddr::containing(BASE)),
            ..Default::default()
        };
        let mut registry = Registry::new();
        registry
            .register(BASE, Role::Data, Protection::NONE)
            .expect("register");
        registry
            .register(BASE + PAGE_SIZE, Role::CodeSquare, Protection::NONE)
            .expect("register");
        assert!(registry.restore_all(&protector).is_err());
        assert_eq!(
            protector.calls.borrow().as_slice(),
            &[(
                PageAddr::containing(BASE + PAGE_SIZE),
                Protection::READ | Protection::EXEC
            )]
        );
    }
}
