//! Cross-plugin symbol resolution.
//!
//! Each context keeps a [`SymbolBook`] of the symbols it resolved and of the
//! plugins providing them. A plugin resolving a symbol from a provider it
//! does not import gains a dynamic import edge to it, so stopping the
//! provider stops the plugin first. The edge goes away again when the last
//! symbol from that provider is released.
use std::collections::HashMap;

use crate::context::environment::{EnvGuard, Holder};
use crate::kernel::error::{Error, Result};
use crate::kernel::fatal::fatal;
use crate::plugin_system::loader::SymbolAddress;
use crate::plugin_system::plugin::PluginState;

#[derive(Debug)]
struct SymbolUsage {
    usage: usize,
    provider: String,
}

#[derive(Debug)]
struct ProviderUsage {
    usage: usize,
    /// The holder depends on the provider only through resolved symbols
    dynamic: bool,
}

/// Symbols resolved by one context
#[derive(Debug, Default)]
pub(crate) struct SymbolBook {
    symbols: HashMap<SymbolAddress, SymbolUsage>,
    providers: HashMap<String, ProviderUsage>,
}

impl SymbolBook {
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.providers.is_empty()
    }

    pub fn symbol_usage(&self, address: SymbolAddress) -> Option<usize> {
        self.symbols.get(&address).map(|s| s.usage)
    }

    pub fn provider_usage(&self, provider: &str) -> Option<usize> {
        self.providers.get(provider).map(|p| p.usage)
    }
}

fn unknown_symbol(provider: &str, name: &str) -> Error {
    Error::Unknown {
        what: "symbol",
        id: format!("{}:{}", provider, name),
    }
}

impl EnvGuard<'_> {
    /// Define a symbol on a plugin.
    pub(crate) fn define_symbol(&self, plugin_id: &str, name: &str, address: SymbolAddress) -> Result<()> {
        let mut state = self.state();
        let Some(plugin) = state.plugins.get_mut(plugin_id) else {
            return Err(Error::unknown_plugin(plugin_id));
        };
        if plugin.defined_symbols.contains_key(name) {
            drop(state);
            self.error(&format!("Plugin {} tried to redefine symbol {}", plugin_id, name));
            return Err(Error::conflict(format!("symbol '{}' is already defined by plugin '{}'", name, plugin_id)));
        }
        plugin.defined_symbols.insert(name.to_string(), address);
        Ok(())
    }

    /// Resolve `name` from `provider_id` on behalf of `holder`.
    pub(crate) fn resolve_symbol(&self, holder: &Holder, provider_id: &str, name: &str) -> Result<SymbolAddress> {
        let provider_state = self.state().plugin_state(provider_id);
        if provider_state == PluginState::Uninstalled {
            self.warn(&format!("Symbol {} in unknown plugin {} could not be resolved", name, provider_id));
            return Err(Error::unknown_plugin(provider_id));
        }
        if provider_state != PluginState::Active && provider_state != PluginState::Starting {
            if let Err(e) = self.start_plugin(provider_id) {
                self.error(&format!(
                    "Symbol {} in plugin {} could not be resolved because the plugin could not be started",
                    name, provider_id
                ));
                return Err(e);
            }
        }

        let address = {
            let state = self.state();
            state.plugins.get(provider_id).and_then(|p| {
                p.defined_symbols
                    .get(name)
                    .copied()
                    .or_else(|| p.library.as_ref().and_then(|lib| lib.symbol(name)))
            })
        };
        let Some(address) = address else {
            self.warn(&format!("Symbol {} in plugin {} could not be resolved because it is not defined", name, provider_id));
            return Err(unknown_symbol(provider_id, name));
        };

        let add_dynamic_edge = {
            let mut state = self.state();
            let needs_edge = match holder {
                Holder::Plugin(importer) if importer != provider_id => {
                    !state.plugins.get(importer).is_some_and(|p| p.imports(provider_id))
                }
                _ => false,
            };
            let book = state.holders.entry(holder.clone()).or_default();
            let mut add_edge = false;
            let provider = book.providers.entry(provider_id.to_string()).or_insert_with(|| {
                add_edge = needs_edge;
                ProviderUsage {
                    usage: 0,
                    dynamic: needs_edge,
                }
            });
            provider.usage += 1;
            book.symbols
                .entry(address)
                .or_insert_with(|| SymbolUsage {
                    usage: 0,
                    provider: provider_id.to_string(),
                })
                .usage += 1;
            add_edge
        };
        if let (true, Holder::Plugin(importer)) = (add_dynamic_edge, holder) {
            self.add_edge(importer, provider_id);
            self.debug(&format!("A dynamic dependency was created from plugin {} to plugin {}", importer, provider_id));
        }
        Ok(address)
    }

    /// Release a symbol previously resolved by `holder`.
    pub(crate) fn release_symbol(&self, holder: &Holder, address: SymbolAddress) -> Result<()> {
        let severed = {
            let mut state = self.state();
            let Some(book) = state.holders.get_mut(holder) else {
                drop(state);
                self.warn(&format!("Could not release unknown symbol at address {}", address));
                return Err(Error::Unknown { what: "symbol", id: address.to_string() });
            };
            let Some(symbol) = book.symbols.get_mut(&address) else {
                drop(state);
                self.warn(&format!("Could not release unknown symbol at address {}", address));
                return Err(Error::Unknown { what: "symbol", id: address.to_string() });
            };
            symbol.usage -= 1;
            let provider_id = symbol.provider.clone();
            if symbol.usage == 0 {
                book.symbols.remove(&address);
            }

            let mut severed = None;
            if let Some(provider) = book.providers.get_mut(&provider_id) {
                provider.usage -= 1;
                if provider.usage == 0 {
                    let dynamic = provider.dynamic;
                    book.providers.remove(&provider_id);
                    if dynamic {
                        severed = Some(provider_id);
                    }
                }
            }
            if book.is_empty() {
                state.holders.remove(holder);
            }
            severed
        };

        if let (Some(provider_id), Holder::Plugin(importer)) = (severed, holder) {
            self.remove_edge(importer, &provider_id);
            self.debug(&format!("A dynamic dependency was removed from plugin {} to plugin {}", importer, provider_id));
        }
        Ok(())
    }

    /// Clear the symbol bookkeeping of a plugin that is being stopped.
    ///
    /// With `enforce` set, symbols the plugin itself still holds are a
    /// contract violation; otherwise they are released on its behalf.
    /// Records other contexts keep for symbols provided by the plugin are
    /// dropped with a warning.
    pub(crate) fn retire_symbols(&self, plugin_id: &str, enforce: bool) {
        let own = Holder::Plugin(plugin_id.to_string());
        let held: Vec<SymbolAddress> = self
            .state()
            .holders
            .get(&own)
            .map(|book| book.symbols.keys().copied().collect())
            .unwrap_or_default();
        if !held.is_empty() {
            if enforce {
                fatal(format!("Plugin {} did not release all resolved symbols before stopping", plugin_id));
            }
            self.warn(&format!("Releasing {} symbols plugin {} did not release", held.len(), plugin_id));
            for address in held {
                loop {
                    let remaining = self.state().holders.get(&own).and_then(|b| b.symbol_usage(address));
                    if remaining.is_none() || self.release_symbol(&own, address).is_err() {
                        break;
                    }
                }
            }
        }

        let mut leftovers = Vec::new();
        {
            let mut state = self.state();
            for (holder, book) in state.holders.iter_mut() {
                let before = book.symbols.len();
                book.symbols.retain(|_, s| s.provider != plugin_id);
                let provider = book.providers.remove(plugin_id);
                if book.symbols.len() != before || provider.is_some() {
                    leftovers.push((holder.clone(), provider.is_some_and(|p| p.dynamic)));
                }
            }
            state.holders.retain(|_, book| !book.is_empty());
            if let Some(plugin) = state.plugins.get_mut(plugin_id) {
                plugin.defined_symbols.clear();
            }
        }
        for (holder, dynamic) in leftovers {
            let who = match &holder {
                Holder::Main => "The main program".to_string(),
                Holder::Plugin(id) => format!("Plugin {}", id),
            };
            self.warn(&format!("{} still used symbols of plugin {} when it was stopped", who, plugin_id));
            if let (Holder::Plugin(importer), true) = (&holder, dynamic) {
                self.remove_edge(importer, plugin_id);
            }
        }
    }
}
