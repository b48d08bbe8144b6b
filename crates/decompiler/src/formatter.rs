//! Prose formatter for enemy battle AI.
//!
//! Battle scripts spend most of their statements on a small vocabulary of
//! natives (pick an action, pick a target, check HP). Rendering those as
//! sentences makes a script readable at a glance, so this formatter
//! translates the common calls, falling back to plain `name(args)` for
//! everything else by returning `None`.
//!
//! The enemy and skill name tables are plain `index -> string` maps;
//! decoding them out of the game files is someone else's job.

use std::collections::BTreeMap;

use crate::ast::{AstNode, Tag};
use crate::natives::NativeRegistry;

/// Literal value of a node, when it is a literal.
fn lit_value(node: &AstNode) -> Option<i64> {
    (node.tag == Tag::Lit).then(|| node.vals[0])
}

/// Build the battle formatter over the given name tables.
///
/// The returned closure follows the pretty-printer's formatter contract:
/// `(native_index, param_nodes, param_strings) -> Option<String>`.
pub fn enemy_formatter<'a>(
    natives: &'a NativeRegistry,
    enemy_names: &'a BTreeMap<i64, String>,
    skill_names: &'a BTreeMap<i64, String>,
) -> impl FnMut(u16, &[&AstNode], &[String]) -> Option<String> + 'a {
    move |index, params, param_strs| {
        let name = natives.lookup(index)?.display_name();
        match name {
            "set_action_attack" => Some("Use a normal attack.".to_string()),
            "set_action_skill" => {
                let skill = lit_value(params.first()?)?;
                let skill_name = skill_names.get(&skill)?;
                Some(format!("Use {} (skill {}).", skill_name, skill))
            }
            "set_action_flee" => Some("Attempt to escape.".to_string()),
            "set_action_defend" => Some("Defend.".to_string()),
            "set_action_leveled_skill" => {
                let skill = lit_value(params.first()?)?;
                let level = lit_value(params.get(1)?)?;
                let skill_name = skill_names.get(&skill)?;
                Some(format!("Use level {} {} (skill {}).", level, skill_name, skill))
            }
            "set_targeting_standard" => Some("Use standard targeting.".to_string()),
            "set_targeting_self" => Some("Targets itself.".to_string()),
            "retrieve" => {
                let slot = lit_value(params.first()?)?;
                Some(format!("v{}", slot))
            }
            "store" => {
                let slot = lit_value(params.get(1)?)?;
                Some(format!("v{} = {}", slot, param_strs.first()?))
            }
            "get_flag" => {
                let flag = lit_value(params.first()?)?;
                Some(format!("flag{}", flag))
            }
            "set_flag" => {
                let flag = lit_value(params.first()?)?;
                Some(format!("flag{} = True", flag))
            }
            "unset_flag" => {
                let flag = lit_value(params.first()?)?;
                Some(format!("flag{} = False", flag))
            }
            "enemy_exists" => {
                let enemy = lit_value(params.first()?)?;
                let enemy_name = enemy_names.get(&enemy)?;
                Some(format!(
                    "there is a(n) {} (enemy {}) in the fight",
                    enemy_name, enemy
                ))
            }
            "hp_check" => Some(format!("HP% <= {}", param_strs.first()?)),
            _ => None,
        }
    }
}
