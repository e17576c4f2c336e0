#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotorId {
    Main,
    Loop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Target in degrees, range checked by the controller.
    SetRotor(RotorId, i64),
    RotorStatus(RotorId),
    SetAntenna(String),
    AntennaList,
    RadioStatus,
    LightningMap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Wrong number of arguments.
    Invalid,
    /// The angle is not a number.
    BadAngle,
}

impl ParseError {
    pub fn reply(&self) -> &'static str {
        match self {
            ParseError::Invalid => "That is an invalid command",
            ParseError::BadAngle => "That is an invalid command. Range must be in 0° - 359°",
        }
    }
}

/// Parses a chat message; `None` when it is not a known command.
pub fn parse(text: &str) -> Option<Result<Command, ParseError>> {
    let mut tokens = text.split_whitespace();
    // Allow the `/cmd@botname` form used in group chats.
    let name = tokens.next()?.split('@').next()?;
    let args: Vec<&str> = tokens.collect();

    let command = match name {
        "/setrotor" => set_rotor(RotorId::Main, &args),
        "/setloop" => set_rotor(RotorId::Loop, &args),
        "/rotorstatus" => Ok(Command::RotorStatus(RotorId::Main)),
        "/loopstatus" => Ok(Command::RotorStatus(RotorId::Loop)),
        "/setant" => match args.as_slice() {
            [code] => Ok(Command::SetAntenna(code.to_string())),
            _ => Err(ParseError::Invalid),
        },
        "/getant" => Ok(Command::AntennaList),
        "/flexstatus" => Ok(Command::RadioStatus),
        "/flashes" => Ok(Command::LightningMap),
        _ => return None,
    };
    Some(command)
}

fn set_rotor(rotor: RotorId, args: &[&str]) -> Result<Command, ParseError> {
    let [degrees] = args else {
        return Err(ParseError::Invalid);
    };
    degrees
        .parse::<i64>()
        .map(|degrees| Command::SetRotor(rotor, degrees))
        .map_err(|_| ParseError::BadAngle)
}
