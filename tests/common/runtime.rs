//! Flat byte memory and the runtime library, shared by both executors.

use std::collections::VecDeque;

const NULL_GUARD: usize = 16;

/// Memory is bump allocated and never freed. The first bytes are kept unused
/// so that null dereferences are caught.
pub struct Runtime {
    memory: Vec<u8>,

    /// Everything printed by the program
    pub output: String,
    /// Lines handed out by `getString` and `getInt`
    pub input: VecDeque<String>,
    /// Every function called, user and runtime alike, in call order
    pub calls: Vec<String>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            memory: vec![0; NULL_GUARD],
            output: String::new(),
            input: VecDeque::new(),
            calls: vec![],
        }
    }

    pub fn allocate(&mut self, size: u32) -> i32 {
        while self.memory.len() % 4 != 0 {
            self.memory.push(0);
        }

        let address = self.memory.len();
        self.memory.resize(address + size.max(1) as usize, 0);
        address as i32
    }

    pub fn allocate_string(&mut self, value: &str) -> i32 {
        let address = self.allocate(value.len() as u32 + 1);
        self.memory[address as usize..address as usize + value.len()]
            .copy_from_slice(value.as_bytes());
        address
    }

    pub fn read(&self, address: i32, size: u32) -> i32 {
        assert!(address as usize >= NULL_GUARD, "null dereference");
        let address = address as usize;

        match size {
            1 => self.memory[address] as i32,
            4 => i32::from_le_bytes(
                self.memory[address..address + 4]
                    .try_into()
                    .expect("word read out of bounds"),
            ),
            other => panic!("unsupported access size {other}"),
        }
    }

    pub fn write(&mut self, address: i32, size: u32, value: i32) {
        assert!(address as usize >= NULL_GUARD, "null dereference");
        let address = address as usize;

        match size {
            1 => self.memory[address] = value as u8,
            4 => self.memory[address..address + 4].copy_from_slice(&value.to_le_bytes()),
            other => panic!("unsupported access size {other}"),
        }
    }

    pub fn read_string(&self, address: i32) -> String {
        let start = address as usize;
        let end = start
            + self.memory[start..]
                .iter()
                .position(|b| *b == 0)
                .expect("unterminated string");

        String::from_utf8_lossy(&self.memory[start..end]).into_owned()
    }

    fn copy_string(&mut self, address: i32, value: &str) {
        let start = address as usize;
        self.memory[start..start + value.len()].copy_from_slice(value.as_bytes());
        self.memory[start + value.len()] = 0;
    }

    /// Runs the runtime function `name`.
    pub fn builtin(&mut self, name: &str, arguments: &[i32]) -> i32 {
        let string = |runtime: &Self, index: usize| runtime.read_string(arguments[index]);

        match name {
            "__mx_malloc" => self.allocate(arguments[0] as u32),
            "__mx_strlen" | "__mx_string_length" => string(self, 0).len() as i32,
            "__mx_strcpy" => {
                let value = string(self, 1);
                self.copy_string(arguments[0], &value);
                arguments[0]
            }
            "__mx_strcat" => {
                let value = string(self, 1);
                let end = arguments[0] + string(self, 0).len() as i32;
                self.copy_string(end, &value);
                arguments[0]
            }
            "__mx_string_eq" => (string(self, 0) == string(self, 1)) as i32,
            "__mx_string_ne" => (string(self, 0) != string(self, 1)) as i32,
            "__mx_string_lt" => (string(self, 0) < string(self, 1)) as i32,
            "__mx_string_le" => (string(self, 0) <= string(self, 1)) as i32,
            "__mx_string_gt" => (string(self, 0) > string(self, 1)) as i32,
            "__mx_string_ge" => (string(self, 0) >= string(self, 1)) as i32,
            "__mx_string_substring" => {
                let value = string(self, 0);
                let part = value[arguments[1] as usize..arguments[2] as usize].to_owned();
                self.allocate_string(&part)
            }
            "__mx_string_parseInt" => {
                let value = string(self, 0);
                let digits = value
                    .char_indices()
                    .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                    .map(|(_, c)| c)
                    .collect::<String>();
                digits.parse().unwrap_or(0)
            }
            "__mx_string_ord" => string(self, 0).as_bytes()[arguments[1] as usize] as i32,
            "print" => {
                self.output.push_str(&string(self, 0));
                0
            }
            "println" => {
                self.output.push_str(&string(self, 0));
                self.output.push('\n');
                0
            }
            "printInt" => {
                self.output.push_str(&arguments[0].to_string());
                0
            }
            "printlnInt" => {
                self.output.push_str(&format!("{}\n", arguments[0]));
                0
            }
            "getString" => {
                let line = self.input.pop_front().unwrap_or_default();
                self.allocate_string(&line)
            }
            "getInt" => self
                .input
                .pop_front()
                .and_then(|line| line.trim().parse().ok())
                .unwrap_or(0),
            "toString" => self.allocate_string(&arguments[0].to_string()),
            other => panic!("call to unknown function `{other}`"),
        }
    }
}
