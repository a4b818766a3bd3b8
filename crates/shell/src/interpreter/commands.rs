//! Command table

/// Every command the shell dispatches, besides `exit` / `quit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Select,
    Ctrl,
    Int,
    Bulk,
    Isoc,
    List,
    Save,
    Exec,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::Help,
        Command::Select,
        Command::Ctrl,
        Command::Int,
        Command::Bulk,
        Command::Isoc,
        Command::List,
        Command::Save,
        Command::Exec,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Select => "select",
            Command::Ctrl => "ctrl",
            Command::Int => "int",
            Command::Bulk => "bulk",
            Command::Isoc => "isoc",
            Command::List => "list",
            Command::Save => "save",
            Command::Exec => "exec",
        }
    }

    /// Minimum token count, command name included
    pub fn min_args(self) -> usize {
        match self {
            Command::Help | Command::List => 1,
            Command::Save | Command::Exec => 2,
            Command::Select | Command::Int | Command::Bulk => 3,
            Command::Isoc => 4,
            Command::Ctrl => 6,
        }
    }

    /// Exact, case-sensitive lookup
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// `true` for the words that end a session
pub fn is_exit(name: &str) -> bool {
    matches!(name, "exit" | "quit")
}

pub const HELP_TEXT: &str = "\
Commands:
  exit / quit
    Exits the program
  help
    Prints this message
  select <interface> <alt setting>
    Claim an interface and select an alt setting within that interface
  ctrl <req type> <request> <value> <index> <length / file / byte array>
    Issues a control transfer
  int <endpoint> <length / file / byte array>
    Issues an interrupt transfer
  bulk <endpoint> <length / file / byte array>
    Issues a bulk transfer
  isoc <endpoint> <packet count> <packet size> [input file / byte array]
    Issues an isochronous transfer
  list [filter(s)...]
    List all transfers that match certain criteria
    See \"Filters\" for more info
  save <file> [filter(s)...]
    Saves packet data from all transfers that match certain criteria
  exec <script file>
    Loads a text file and interprets each line as a command

  Req type and endpoint are hexadecimal; other numbers accept 0x / 0 prefixes.
  For IN transfers the last argument is the number of bytes to read.

Filters:
  A way of selecting which transfers to view or save.
  The format is: <variable> <sign> <value> [<sign> <value>]
   eg. \"id > 10\"
       id>10
       \"id >= 7 <= 10\"
       id>=7<=10
       \"id = 0x2a\"
       \"type = isoc\"
  Note:
   1) a filter must fit into a single argument,
       ie. you must use quotes or avoid spaces
   2) for string variables (eg. type), only the equals sign is allowed
   3) each variable may only be filtered once per command

Filter Variables:
  id
    Select transfer by its id/index
  type
    Select for transfers of a certain type (out of ctrl, int, bulk, isoc)
  size
    Select for the size of a transfer's data
  index
    For control transfers only, select for the index parameter
  ep
    Select for the endpoint (or req type if ctrl) AND 0x1f
  errors
    For isochronous transfers only, select for the number of errors
";
