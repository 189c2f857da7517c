use crate::input::{InputState, TriggerSide};
use crate::settings::MappingTable;
use serde::{Deserialize, Serialize};

/// Digital buttons of the virtual pad (Xbox 360 layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    A,
    B,
    X,
    Y,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    LeftShoulder,
    RightShoulder,
    Start,
    Back,
    LeftThumb,
    RightThumb,
    Guide,
}

impl Button {
    pub const ALL: [Button; 15] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
        Button::LeftShoulder,
        Button::RightShoulder,
        Button::Start,
        Button::Back,
        Button::LeftThumb,
        Button::RightThumb,
        Button::Guide,
    ];
}

/// Desired state of every button this tick.
///
/// Covers all buttons, not only the mapped ones, so a button whose key was
/// remapped away is released rather than left stuck.
pub fn button_states(table: &MappingTable, input: &InputState) -> [(Button, bool); 15] {
    Button::ALL.map(|button| {
        let held = table
            .key_for(button)
            .is_some_and(|key| input.is_key_held(key));
        (button, held)
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerValues {
    pub left: f32,
    pub right: f32,
}

/// Fire drives the right trigger, aim the left one.
pub fn trigger_values(input: &InputState) -> TriggerValues {
    let level = |side| if input.is_trigger_held(side) { 1.0 } else { 0.0 };
    TriggerValues {
        left: level(TriggerSide::Aim),
        right: level(TriggerSide::Fire),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyId;

    fn pressed(states: &[(Button, bool)]) -> Vec<Button> {
        states.iter().filter(|(_, p)| *p).map(|(b, _)| *b).collect()
    }

    #[test]
    fn held_keys_press_their_buttons() {
        let table = MappingTable::default();
        let input = InputState::new();
        input.set_key(&KeyId::new("space"), true);
        input.set_key(&KeyId::new("tab"), true);
        assert_eq!(pressed(&button_states(&table, &input)), vec![Button::A, Button::Back]);

        input.set_key(&KeyId::new("space"), false);
        assert_eq!(pressed(&button_states(&table, &input)), vec![Button::Back]);
    }

    #[test]
    fn nothing_held_releases_everything() {
        let states = button_states(&MappingTable::default(), &InputState::new());
        assert!(states.iter().all(|(_, p)| !p));
        assert_eq!(states.len(), Button::ALL.len());
    }

    #[test]
    fn remapped_button_follows_the_new_key() {
        let mut table = MappingTable::default();
        let input = InputState::new();
        input.set_key(&KeyId::new("c"), true);
        input.set_key(&KeyId::new("space"), true);
        assert_eq!(pressed(&button_states(&table, &input)), vec![Button::A, Button::B]);

        table.remap(&KeyId::new("c"), KeyId::new("x")).unwrap();
        // 'c' is still physically held but no longer drives B.
        assert_eq!(pressed(&button_states(&table, &input)), vec![Button::A]);

        input.set_key(&KeyId::new("x"), true);
        assert_eq!(pressed(&button_states(&table, &input)), vec![Button::A, Button::B]);
    }

    #[test]
    fn triggers_follow_mouse_buttons() {
        let input = InputState::new();
        assert_eq!(trigger_values(&input), TriggerValues { left: 0.0, right: 0.0 });
        input.set_trigger(TriggerSide::Fire, true);
        assert_eq!(trigger_values(&input), TriggerValues { left: 0.0, right: 1.0 });
        input.set_trigger(TriggerSide::Aim, true);
        assert_eq!(trigger_values(&input), TriggerValues { left: 1.0, right: 1.0 });
    }
}
