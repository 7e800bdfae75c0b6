#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "person",
        action: "set_person",
    },
    CommandSpec {
        command: "garment",
        action: "set_garment",
    },
];

pub(crate) const SAVE_COMMAND: CommandSpec = CommandSpec {
    command: "save",
    action: "save_result",
};

pub(crate) const OUTFIT_COMMAND: CommandSpec = CommandSpec {
    command: "outfit",
    action: "select_outfit",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "tryon",
        action: "try_on",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "outfits",
        action: "list_outfits",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/person <path>",
    "/garment <path>",
    "/outfits",
    "/outfit <n>",
    "/tryon",
    "/save [path]",
    "/status",
    "/reset",
    "/help",
    "/quit",
];
